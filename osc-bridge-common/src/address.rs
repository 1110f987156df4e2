use crate::error::{Error, Result};

/// Device name used when the configuration does not name one.
pub const DEFAULT_DEVICE_NAME: &str = "encoder-pi";

/// Address every session receives server heartbeats on.
pub const HEARTBEAT_ADDRESS: &str = "/system/heartbeat";

/// Characters OSC reserves for pattern matching; not allowed in a concrete address.
const RESERVED: &[char] = &[' ', '#', '*', ',', '?', '[', ']', '{', '}'];

/// Builder for device-scoped OSC reply addresses.
///
/// Addresses follow the pattern `/<device>/<path>`.
#[derive(Debug, Clone)]
pub struct AddressBuilder {
    device: String,
}

impl AddressBuilder {
    /// Create a builder scoped to a device name.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    /// The device name every address is prefixed with.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Build an address for a path below the device.
    ///
    /// # Example
    /// ```
    /// use osc_bridge_common::address::AddressBuilder;
    ///
    /// let builder = AddressBuilder::new("encoder-pi");
    /// assert_eq!(builder.build("encoder/data"), "/encoder-pi/encoder/data");
    /// assert_eq!(builder.build("/text"), "/encoder-pi/text");
    /// ```
    pub fn build(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("/{}", self.device)
        } else {
            format!("/{}/{}", self.device, path)
        }
    }

    /// Address structured error replies are sent to.
    ///
    /// # Example
    /// ```
    /// use osc_bridge_common::address::AddressBuilder;
    ///
    /// assert_eq!(AddressBuilder::new("rig").error(), "/rig/error");
    /// ```
    pub fn error(&self) -> String {
        self.build("error")
    }
}

/// A validated OSC address split into its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Address segments, without separators.
    pub segments: Vec<String>,
}

impl ParsedAddress {
    /// First segment (e.g. `encoder` in `/encoder/read_speed`).
    pub fn namespace(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    /// Second segment, if any (e.g. `read_speed` in `/encoder/read_speed`).
    pub fn action(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    /// Drop a leading device segment so `/rig/encoder/x` routes like `/encoder/x`.
    pub fn without_device(mut self, device: &str) -> Self {
        if self.segments.len() > 1 && self.segments[0] == device {
            self.segments.remove(0);
        }
        self
    }

    /// Reassemble the address.
    pub fn to_address(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Parse and validate a concrete OSC address.
///
/// # Example
/// ```
/// use osc_bridge_common::address::parse_address;
///
/// let parsed = parse_address("/encoder/start_monitor").unwrap();
/// assert_eq!(parsed.namespace(), "encoder");
/// assert_eq!(parsed.action(), Some("start_monitor"));
/// ```
pub fn parse_address(address: &str) -> Result<ParsedAddress> {
    let rest = address
        .strip_prefix('/')
        .ok_or_else(|| Error::Address(format!("'{}' does not start with '/'", address)))?;

    if rest.is_empty() {
        return Err(Error::Address("empty address".to_string()));
    }

    if let Some(c) = rest.chars().find(|c| RESERVED.contains(c)) {
        return Err(Error::Address(format!(
            "'{}' contains reserved character '{}'",
            address, c
        )));
    }

    let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(Error::Address(format!("'{}' has an empty segment", address)));
    }

    Ok(ParsedAddress { segments })
}
