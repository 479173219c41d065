#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use rd_wire::FrameDecoder;

#[derive(Arbitrary, Debug)]
struct Input {
    max_frame_len: u16,
    chunk_sizes: Vec<u8>,
    stream: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut whole = FrameDecoder::new(input.max_frame_len as usize);
    whole.push(&input.stream);
    let mut expected = Vec::new();
    let whole_failed = loop {
        match whole.next_frame() {
            Ok(Some(frame)) => expected.push(frame),
            Ok(None) => break false,
            Err(_) => break true,
        }
    };

    // Chunk boundaries never change the decoded frames
    let mut chunked = FrameDecoder::new(input.max_frame_len as usize);
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut sizes = input.chunk_sizes.iter().map(|s| *s as usize + 1).cycle();
    let mut chunked_failed = false;
    'outer: while offset < input.stream.len() {
        let size = sizes.next().unwrap_or(input.stream.len());
        let end = (offset + size).min(input.stream.len());
        chunked.push(&input.stream[offset..end]);
        offset = end;
        loop {
            match chunked.next_frame() {
                Ok(Some(frame)) => decoded.push(frame),
                Ok(None) => break,
                Err(_) => {
                    chunked_failed = true;
                    break 'outer;
                }
            }
        }
    }

    assert_eq!(whole_failed, chunked_failed);
    if !whole_failed {
        assert_eq!(expected, decoded);
    }
});
