//! Polymorphic payloads carried by the demo model

use rd_core::RdResult;
use rd_wire::{Marshal, Polymorphic, PolymorphicType, SerializationCtx, Serializers, SerializersOwner, WireReader, WireWriter};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Marshal for Point {
    fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_i32(self.x);
        w.write_i32(self.y);
    }

    fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(Point {
            x: r.read_i32()?,
            y: r.read_i32()?,
        })
    }
}

impl PolymorphicType for Point {
    const TYPE_NAME: &'static str = "demo.Point";
}

/// Free text with labels and an optional nested payload
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub text: String,
    pub labels: Vec<String>,
    pub attachment: Option<Polymorphic>,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Note {
            text: text.into(),
            labels: Vec::new(),
            attachment: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_attachment<T: PolymorphicType>(mut self, attachment: T) -> Self {
        self.attachment = Some(Polymorphic::new(attachment));
        self
    }
}

impl Marshal for Note {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        self.text.write(ctx, w);
        self.labels.write(ctx, w);
        self.attachment.write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(Note {
            text: String::read(ctx, r)?,
            labels: Vec::read(ctx, r)?,
            attachment: Option::read(ctx, r)?,
        })
    }
}

impl PolymorphicType for Note {
    const TYPE_NAME: &'static str = "demo.Note";
}

/// Registers every polymorphic type of the demo model
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoRootSerializersOwner;

impl SerializersOwner for DemoRootSerializersOwner {
    fn owner_name(&self) -> &'static str {
        "demo.DemoRoot"
    }

    fn register_serializers_core(&self, serializers: &Serializers) -> RdResult<()> {
        serializers.register_if_absent::<Point>()?;
        serializers.register_if_absent::<Note>()?;
        Ok(())
    }
}
