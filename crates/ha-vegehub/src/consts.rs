//! Constants for the VegeHub integration

use ha_hass::Platform;

pub const DOMAIN: &str = "vegehub";
pub const NAME: &str = "VegeHub";
pub const MANUFACTURER: &str = "vegetronix";
pub const MODEL: &str = "VegeHub";

pub const PLATFORMS: &[Platform] = &[Platform::Sensor];

/// Config entry data keys
pub const CONF_MAC: &str = "mac_address";
pub const CONF_IP_ADDRESS: &str = "ip_address";
pub const CONF_HOST: &str = "host";
pub const ATTR_SW_VERSION: &str = "sw_version";
pub const ATTR_CONFIGURATION_URL: &str = "configuration_url";
