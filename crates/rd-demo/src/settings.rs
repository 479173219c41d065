//! Nested settings entity of [`crate::DemoRoot`]

use std::fmt;
use std::sync::Arc;

use rd_core::{IdScope, RdId, RdResult};
use rd_reactive::{identify_entity, RdBindable, RdCore, RdLeaf, RdProperty};
use rd_wire::{Marshal, Polymorphic, SerializationCtx, WireReader, WireWriter};

/// A non-leaf entity: its own id, children identified beneath it
pub struct DemoSettings {
    core: RdCore,
    theme: RdProperty<String>,
    refresh_ms: RdProperty<u32>,
    pinned: RdProperty<Option<Polymorphic>>,
}

impl DemoSettings {
    pub fn new() -> Self {
        DemoSettings {
            core: RdCore::new(),
            theme: RdProperty::new("light".to_string()),
            refresh_ms: RdProperty::new(1000),
            pinned: RdProperty::new(None),
        }
    }

    pub fn id(&self) -> RdId {
        self.core.id()
    }

    pub fn theme(&self) -> &RdProperty<String> {
        &self.theme
    }

    pub fn refresh_ms(&self) -> &RdProperty<u32> {
        &self.refresh_ms
    }

    pub fn pinned(&self) -> &RdProperty<Option<Polymorphic>> {
        &self.pinned
    }

    fn children(&self) -> [(&'static str, &dyn RdBindable); 3] {
        [
            ("theme", &self.theme),
            ("refresh_ms", &self.refresh_ms),
            ("pinned", &self.pinned),
        ]
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl RdBindable for DemoSettings {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_entity(&self.core, scope, location, &self.children());
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        for (_, child) in self.children() {
            child.collect_leaves(out);
        }
    }
}

impl Marshal for DemoSettings {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
        self.theme.write(ctx, w);
        self.refresh_ms.write(ctx, w);
        self.pinned.write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(DemoSettings {
            core: RdCore::with_id(r.read_rd_id()?),
            theme: RdProperty::read(ctx, r)?,
            refresh_ms: RdProperty::read(ctx, r)?,
            pinned: RdProperty::read(ctx, r)?,
        })
    }
}

impl PartialEq for DemoSettings {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
            && self.theme == other.theme
            && self.refresh_ms == other.refresh_ms
            && self.pinned == other.pinned
    }
}

impl fmt::Debug for DemoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoSettings")
            .field("id", &self.id())
            .field("theme", &self.theme.get())
            .field("refresh_ms", &self.refresh_ms.get())
            .field("pinned", &self.pinned.get())
            .finish()
    }
}
