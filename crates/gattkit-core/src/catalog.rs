//! The discovered GATT database of a connection.
//!
//! A [`ServiceCatalog`] is built from the service tree a transport reports
//! after discovery and is replaced wholesale by each completed discovery.
//! Until a first discovery completes, a connection has no catalog at all,
//! which is distinct from a catalog that is present but empty: the former
//! rejects characteristic operations, the latter merely has nothing to
//! operate on.
//!
//! Besides the discovery results, each [`Characteristic`] carries engine
//! state: the last value seen for it and whether a subscription is
//! currently active.

use serde::{Deserialize, Serialize};

use gattkit_types::{BleUuid, CharacteristicProperties};

use crate::transport::{CharacteristicInfo, DescriptorInfo, ServiceInfo};

/// A discovered descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Attribute UUID of the descriptor.
    pub uuid: BleUuid,
    /// ATT handle of the descriptor.
    pub handle: u16,
}

impl From<DescriptorInfo> for Descriptor {
    fn from(info: DescriptorInfo) -> Self {
        Self { uuid: info.uuid, handle: info.handle }
    }
}

/// A discovered characteristic with its cached engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    /// Attribute UUID of the characteristic.
    pub uuid: BleUuid,
    /// ATT value handle, the address used in transport requests.
    pub handle: u16,
    /// Property flags from the characteristic declaration.
    pub properties: CharacteristicProperties,
    /// Last value seen for this characteristic, from a read response or a
    /// notification. Empty until a value arrives.
    pub value: Vec<u8>,
    /// Whether a notification subscription is currently active.
    pub subscribed: bool,
    /// Descriptors attached to this characteristic.
    pub descriptors: Vec<Descriptor>,
}

impl From<CharacteristicInfo> for Characteristic {
    fn from(info: CharacteristicInfo) -> Self {
        Self {
            uuid: info.uuid,
            handle: info.handle,
            properties: info.properties,
            value: Vec::new(),
            subscribed: false,
            descriptors: info.descriptors.into_iter().map(Descriptor::from).collect(),
        }
    }
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Attribute UUID of the service.
    pub uuid: BleUuid,
    /// Whether this is a primary service.
    pub is_primary: bool,
    /// Characteristics contained in the service, in discovery order.
    pub characteristics: Vec<Characteristic>,
}

impl From<ServiceInfo> for Service {
    fn from(info: ServiceInfo) -> Self {
        Self {
            uuid: info.uuid,
            is_primary: info.is_primary,
            characteristics: info.characteristics.into_iter().map(Characteristic::from).collect(),
        }
    }
}

/// The complete discovered GATT database of a connection.
///
/// Lookups by UUID walk services and characteristics in discovery order;
/// when a peripheral exposes the same characteristic UUID more than once,
/// the first match wins and the others must be reached through
/// [`services`](Self::services) directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    services: Vec<Service>,
}

impl ServiceCatalog {
    /// Builds a catalog from the transport's discovery report.
    pub fn from_services(tree: Vec<ServiceInfo>) -> Self {
        Self { services: tree.into_iter().map(Service::from).collect() }
    }

    /// All discovered services in discovery order.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Number of discovered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the catalog contains no services.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Looks up a service by UUID.
    pub fn service(&self, uuid: BleUuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Looks up a characteristic by UUID across all services.
    pub fn characteristic(&self, uuid: BleUuid) -> Option<&Characteristic> {
        self.characteristics().find(|c| c.uuid == uuid)
    }

    /// Looks up a characteristic by its ATT value handle.
    pub fn characteristic_by_handle(&self, handle: u16) -> Option<&Characteristic> {
        self.characteristics().find(|c| c.handle == handle)
    }

    pub(crate) fn characteristic_by_handle_mut(&mut self, handle: u16) -> Option<&mut Characteristic> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.handle == handle)
    }

    /// Iterates over all characteristics in discovery order.
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }
}

impl From<Vec<ServiceInfo>> for ServiceCatalog {
    fn from(tree: Vec<ServiceInfo>) -> Self {
        Self::from_services(tree)
    }
}
