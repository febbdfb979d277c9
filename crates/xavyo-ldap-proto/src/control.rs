//! LDAP controls: the `[0] SEQUENCE OF Control` trailer of a message.

use crate::ber::{BerReader, BerWriter, TAG_BOOLEAN, TAG_OCTET_STRING, TAG_SEQUENCE};
use crate::error::ProtocolResult;

/// Tag of the controls trailer inside an LdapMessage.
pub(crate) const TAG_CONTROLS: u8 = 0xa0;

/// A single control: OID, criticality, and an opaque value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            critical: false,
            value: None,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = Some(value);
        self
    }
}

pub(crate) fn encode_controls(w: &mut BerWriter, controls: &[Control]) {
    if controls.is_empty() {
        return;
    }
    let trailer = w.begin(TAG_CONTROLS);
    for control in controls {
        let mark = w.begin(TAG_SEQUENCE);
        w.write_string(&control.oid);
        // FALSE is the DER default and is omitted on the wire.
        if control.critical {
            w.write_bool(true);
        }
        if let Some(value) = &control.value {
            w.write_octets(value);
        }
        w.end(mark);
    }
    w.end(trailer);
}

pub(crate) fn decode_controls(r: &mut BerReader<'_>) -> ProtocolResult<Vec<Control>> {
    let mut list = r.read_nested(TAG_CONTROLS)?;
    let mut controls = Vec::new();
    while !list.is_empty() {
        let mut body = list.read_nested(TAG_SEQUENCE)?;
        let oid = body.read_string("control oid")?;
        let mut control = Control::new(oid);
        if !body.is_empty() && body.peek_tag()? == TAG_BOOLEAN {
            control.critical = body.read_bool()?;
        }
        if !body.is_empty() && body.peek_tag()? == TAG_OCTET_STRING {
            control.value = Some(body.read_octets()?.to_vec());
        }
        controls.push(control);
    }
    Ok(controls)
}
