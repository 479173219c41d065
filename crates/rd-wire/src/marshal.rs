//! Positional serialization contract
//!
//! There are no field names on the wire: values are written and read in a
//! fixed order, so both ends must share the exact same schema.

use bytes::Bytes;

use rd_core::{RdId, RdResult};

use crate::{SerializationCtx, WireReader, WireWriter};

/// A type with a wire representation
pub trait Marshal: Sized {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter);
    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Marshal for $ty {
                #[inline]
                fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
                    w.$write(*self);
                }

                #[inline]
                fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
                    r.$read()
                }
            }
        )*
    };
}

impl_scalar! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    RdId => write_rd_id, read_rd_id;
}

impl Marshal for () {
    fn write(&self, _ctx: &SerializationCtx, _w: &mut WireWriter) {}

    fn read(_ctx: &SerializationCtx, _r: &mut WireReader) -> RdResult<Self> {
        Ok(())
    }
}

impl Marshal for String {
    fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_str(self);
    }

    fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        r.read_string()
    }
}

impl Marshal for Bytes {
    fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_varint(self.len() as u64);
        w.write_raw(self);
    }

    fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let len = r.read_len()?;
        r.read_raw(len)
    }
}

/// Nullable-of: presence flag, then the value
impl<T: Marshal> Marshal for Option<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        match self {
            Some(value) => {
                w.write_bool(true);
                value.write(ctx, w);
            }
            None => w.write_bool(false),
        }
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        if r.read_bool()? {
            Ok(Some(T::read(ctx, r)?))
        } else {
            Ok(None)
        }
    }
}

/// Array-of: element count, then each element
impl<T: Marshal> Marshal for Vec<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_varint(self.len() as u64);
        for item in self {
            item.write(ctx, w);
        }
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        // every element occupies at least one byte
        let count = r.read_len()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::read(ctx, r)?);
        }
        Ok(items)
    }
}

impl<T: Marshal> Marshal for Box<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        (**self).write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(Box::new(T::read(ctx, r)?))
    }
}

impl<A: Marshal, B: Marshal> Marshal for (A, B) {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        self.0.write(ctx, w);
        self.1.write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok((A::read(ctx, r)?, B::read(ctx, r)?))
    }
}

impl<A: Marshal, B: Marshal, C: Marshal> Marshal for (A, B, C) {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        self.0.write(ctx, w);
        self.1.write(ctx, w);
        self.2.write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok((A::read(ctx, r)?, B::read(ctx, r)?, C::read(ctx, r)?))
    }
}
