//! DemoRoot extension root

use std::fmt;
use std::sync::Arc;

use rd_core::{Lifetime, RdId, RdResult};
use rd_reactive::{ExtStatus, Protocol, RdBindable, RdExtBase, RdList, RdMap, RdProperty, RdSet, RdSignal};
use rd_rpc::RdCall;
use rd_wire::{Polymorphic, Serializers, SerializersOwner};

use crate::{DemoRootSerializersOwner, DemoSettings};

/// The demo model. Both ends construct it identically and connect it to
/// their protocol; field declaration order is part of the wire contract.
pub struct DemoRoot {
    base: RdExtBase,
    counter: RdProperty<i32>,
    status: RdProperty<Option<String>>,
    ping: RdSignal<u32>,
    items: RdList<String>,
    tags: RdSet<String>,
    scores: RdMap<String, i64>,
    notes: RdList<Polymorphic>,
    echo: RdCall<String, String>,
    settings: DemoSettings,
}

impl DemoRoot {
    pub const NAME: &'static str = "DemoRoot";

    pub fn new() -> Self {
        DemoRoot {
            base: RdExtBase::new(Self::NAME),
            counter: RdProperty::new(0),
            status: RdProperty::new(None),
            ping: RdSignal::new(),
            items: RdList::new(),
            tags: RdSet::new(),
            scores: RdMap::new(),
            notes: RdList::new(),
            echo: RdCall::new(),
            settings: DemoSettings::new(),
        }
    }

    pub fn serializers_owner() -> &'static dyn SerializersOwner {
        &DemoRootSerializersOwner
    }

    /// Register the demo types. Repeating it on the same registry, or finding
    /// some demo types already registered one by one, is not an error.
    pub fn register_serializers(serializers: &Serializers) -> RdResult<()> {
        serializers.register_owner(Self::serializers_owner())
    }

    /// Register the demo types with the protocol, then bind every field for
    /// the intersection of `lifetime` and the protocol connection.
    /// Reconnecting a new root on a protocol that already knows the demo
    /// types is allowed.
    pub fn connect(&self, lifetime: &Lifetime, protocol: &Arc<Protocol>) -> RdResult<Lifetime> {
        Self::register_serializers(protocol.serializers())?;
        let connection = self.base.connect(lifetime, protocol, &self.children())?;
        tracing::debug!(protocol = %protocol.name(), id = %self.id(), "DemoRoot connected");
        Ok(connection)
    }

    /// Assign ids without binding
    pub fn identify(&self, protocol: &Protocol) -> RdId {
        self.base.identify(protocol, &self.children())
    }

    pub fn id(&self) -> RdId {
        self.base.id()
    }

    pub fn status(&self) -> ExtStatus {
        self.base.status()
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    pub fn counter(&self) -> &RdProperty<i32> {
        &self.counter
    }

    pub fn status_text(&self) -> &RdProperty<Option<String>> {
        &self.status
    }

    pub fn ping(&self) -> &RdSignal<u32> {
        &self.ping
    }

    pub fn items(&self) -> &RdList<String> {
        &self.items
    }

    pub fn tags(&self) -> &RdSet<String> {
        &self.tags
    }

    pub fn scores(&self) -> &RdMap<String, i64> {
        &self.scores
    }

    pub fn notes(&self) -> &RdList<Polymorphic> {
        &self.notes
    }

    pub fn echo(&self) -> &RdCall<String, String> {
        &self.echo
    }

    pub fn settings(&self) -> &DemoSettings {
        &self.settings
    }

    fn children(&self) -> [(&'static str, &dyn RdBindable); 9] {
        [
            ("counter", &self.counter),
            ("status", &self.status),
            ("ping", &self.ping),
            ("items", &self.items),
            ("tags", &self.tags),
            ("scores", &self.scores),
            ("notes", &self.notes),
            ("echo", &self.echo),
            ("settings", &self.settings),
        ]
    }
}

impl Default for DemoRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Roots are compared by identity
impl PartialEq for DemoRoot {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for DemoRoot {}

impl fmt::Debug for DemoRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoRoot")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("counter", &self.counter.get())
            .field("items", &self.items.len())
            .field("settings", &self.settings)
            .finish()
    }
}
