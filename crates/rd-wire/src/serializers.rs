//! Polymorphic serialization registry and serialization context
//!
//! A polymorphic value is written as `[discriminator: u64][len: varint][body]`.
//! The reader resolves the discriminator against a process-wide, append-only
//! registry. Registering the same discriminator twice fails at registration.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use rd_core::{RdError, RdId, RdResult};

use crate::{Marshal, WireReader, WireWriter};

/// Concrete type that can travel inside a [`Polymorphic`]
pub trait PolymorphicType: Marshal + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Stable name hashed into the discriminator
    const TYPE_NAME: &'static str;

    fn discriminator() -> RdId {
        RdId::from_type_name(Self::TYPE_NAME)
    }
}

/// Object-safe view of a [`PolymorphicType`]
pub trait RdPolymorphic: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn write_body(&self, ctx: &SerializationCtx, w: &mut WireWriter);
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn RdPolymorphic) -> bool;
    fn clone_boxed(&self) -> Box<dyn RdPolymorphic>;
}

impl<T: PolymorphicType> RdPolymorphic for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn write_body(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        self.write(ctx, w);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn RdPolymorphic) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn clone_boxed(&self) -> Box<dyn RdPolymorphic> {
        Box::new(self.clone())
    }
}

/// Polymorphic-of: a value of any registered type
pub struct Polymorphic(Box<dyn RdPolymorphic>);

impl Polymorphic {
    pub fn new<T: PolymorphicType>(value: T) -> Self {
        Polymorphic(Box::new(value))
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn discriminator(&self) -> RdId {
        RdId::from_type_name(self.0.type_name())
    }

    pub fn downcast_ref<T: PolymorphicType>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn is<T: PolymorphicType>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

impl Clone for Polymorphic {
    fn clone(&self) -> Self {
        Polymorphic(self.0.clone_boxed())
    }
}

impl PartialEq for Polymorphic {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl fmt::Debug for Polymorphic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl Marshal for Polymorphic {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        let mut body = WireWriter::new();
        self.0.write_body(ctx, &mut body);
        w.write_rd_id(self.discriminator());
        w.write_varint(body.len() as u64);
        w.write_raw(body.as_slice());
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let id = r.read_rd_id()?;
        let len = r.read_len()?;
        let reader = ctx.serializers().reader_for(id)?;
        let mut body = WireReader::new(r.read_raw(len)?);
        let value = reader(ctx, &mut body)?;
        body.expect_end()?;
        Ok(value)
    }
}

type ReadFn = fn(&SerializationCtx, &mut WireReader) -> RdResult<Polymorphic>;

fn read_as<T: PolymorphicType>(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Polymorphic> {
    Ok(Polymorphic::new(T::read(ctx, r)?))
}

struct Registration {
    type_name: &'static str,
    read: ReadFn,
}

/// Group of types registered together, once per registry
pub trait SerializersOwner: Send + Sync {
    fn owner_name(&self) -> &'static str;
    fn register_serializers_core(&self, serializers: &Serializers) -> RdResult<()>;
}

/// Append-only discriminator → reader registry
#[derive(Default)]
pub struct Serializers {
    types: RwLock<HashMap<RdId, Registration>>,
    owners: Mutex<HashSet<&'static str>>,
}

impl Serializers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a polymorphic type. A discriminator can be registered once.
    pub fn register<T: PolymorphicType>(&self) -> RdResult<()> {
        let id = T::discriminator();
        let mut types = self.types.write();
        if let Some(existing) = types.get(&id) {
            return Err(RdError::DuplicateDiscriminator {
                id,
                type_name: format!("{} (already {})", T::TYPE_NAME, existing.type_name),
            });
        }
        types.insert(
            id,
            Registration {
                type_name: T::TYPE_NAME,
                read: read_as::<T>,
            },
        );
        tracing::trace!(type_name = T::TYPE_NAME, discriminator = %id, "registered serializer");
        Ok(())
    }

    /// Register `T` unless the same type already holds its discriminator.
    ///
    /// Returns `Ok(false)` when `T` was registered before. A different type
    /// under the same discriminator is still a `DuplicateDiscriminator` error.
    pub fn register_if_absent<T: PolymorphicType>(&self) -> RdResult<bool> {
        match self.register::<T>() {
            Ok(()) => Ok(true),
            Err(RdError::DuplicateDiscriminator { .. })
                if self
                    .types
                    .read()
                    .get(&T::discriminator())
                    .is_some_and(|existing| existing.type_name == T::TYPE_NAME) =>
            {
                tracing::trace!(type_name = T::TYPE_NAME, "serializer already registered");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Register an owner's group; a second registration of the same owner is a no-op
    pub fn register_owner(&self, owner: &dyn SerializersOwner) -> RdResult<()> {
        if !self.owners.lock().insert(owner.owner_name()) {
            return Ok(());
        }
        let result = owner.register_serializers_core(self);
        if result.is_err() {
            self.owners.lock().remove(owner.owner_name());
        }
        result
    }

    pub fn is_registered(&self, id: RdId) -> bool {
        self.types.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    fn reader_for(&self, id: RdId) -> RdResult<ReadFn> {
        self.types
            .read()
            .get(&id)
            .map(|registration| registration.read)
            .ok_or(RdError::UnknownDiscriminator(id))
    }
}

/// Everything a reader or writer needs besides the bytes
#[derive(Clone, Default)]
pub struct SerializationCtx {
    serializers: Arc<Serializers>,
}

impl SerializationCtx {
    pub fn new(serializers: Arc<Serializers>) -> Self {
        SerializationCtx { serializers }
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        &self.serializers
    }

    pub fn write<T: Marshal>(&self, w: &mut WireWriter, value: &T) {
        value.write(self, w);
    }

    pub fn read<T: Marshal>(&self, r: &mut WireReader) -> RdResult<T> {
        T::read(self, r)
    }

    /// Serialize a value into a standalone buffer
    pub fn to_bytes<T: Marshal>(&self, value: &T) -> bytes::Bytes {
        let mut w = WireWriter::new();
        value.write(self, &mut w);
        w.freeze()
    }

    /// Deserialize a value that must occupy the whole buffer
    pub fn from_bytes<T: Marshal>(&self, bytes: bytes::Bytes) -> RdResult<T> {
        let mut r = WireReader::new(bytes);
        let value = T::read(self, &mut r)?;
        r.expect_end()?;
        Ok(value)
    }
}
