//! Edge device adapter

use super::Address;
use crate::model::EdgeDevice;

/// Treats a registered device as an already running machine
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeAdapter;

impl EdgeAdapter {
    /// Machine identifier derived from the device
    pub fn machine_id(&self, device: &EdgeDevice) -> String {
        format!("edge-{}", device.id)
    }

    /// The device's registered address, used as both public and private
    pub fn address(&self, device: &EdgeDevice) -> Address {
        Address {
            public: device.ip_address.clone(),
            private: Some(device.ip_address.clone()),
        }
    }
}
