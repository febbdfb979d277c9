//! Wire codec for [`LdapMessage`].
//!
//! Encoding always yields one complete PDU. Decoding is incremental:
//! [`decode_message`] consumes nothing until a full envelope is
//! buffered, so the caller can feed it straight from a socket read
//! loop without worrying about TCP segmentation.

use bytes::{Bytes, BytesMut};

use crate::ber::{element_boundary, BerReader, BerWriter, Boundary, TAG_SEQUENCE, TAG_SET};
use crate::control::{decode_controls, encode_controls, TAG_CONTROLS};
use crate::error::{ProtocolError, ProtocolResult};
use crate::filter::Filter;
use crate::message::{
    AddRequest, Attribute, BindAuth, BindRequest, BindResponse, CompareRequest, DerefAliases,
    ExtendedRequest, ExtendedResponse, LdapMessage, LdapResult, ModifyChange, ModifyDnRequest,
    ModifyOp, ModifyRequest, ProtocolOp, ResultCode, Scope, SearchEntry, SearchRequest,
};

/// Hard ceiling on a single PDU. A peer claiming more than this is
/// treated as broken rather than buffered.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

const TAG_BIND_REQUEST: u8 = 0x60;
const TAG_BIND_RESPONSE: u8 = 0x61;
const TAG_UNBIND_REQUEST: u8 = 0x42;
const TAG_SEARCH_REQUEST: u8 = 0x63;
const TAG_SEARCH_ENTRY: u8 = 0x64;
const TAG_SEARCH_DONE: u8 = 0x65;
const TAG_MODIFY_REQUEST: u8 = 0x66;
const TAG_MODIFY_RESPONSE: u8 = 0x67;
const TAG_ADD_REQUEST: u8 = 0x68;
const TAG_ADD_RESPONSE: u8 = 0x69;
const TAG_DEL_REQUEST: u8 = 0x4a;
const TAG_DEL_RESPONSE: u8 = 0x6b;
const TAG_MODIFY_DN_REQUEST: u8 = 0x6c;
const TAG_MODIFY_DN_RESPONSE: u8 = 0x6d;
const TAG_COMPARE_REQUEST: u8 = 0x6e;
const TAG_COMPARE_RESPONSE: u8 = 0x6f;
const TAG_ABANDON_REQUEST: u8 = 0x50;
const TAG_SEARCH_REFERENCE: u8 = 0x73;
const TAG_EXTENDED_REQUEST: u8 = 0x77;
const TAG_EXTENDED_RESPONSE: u8 = 0x78;

const TAG_AUTH_SIMPLE: u8 = 0x80;
const TAG_AUTH_SASL: u8 = 0xa3;
const TAG_SASL_CREDS: u8 = 0x87;
const TAG_REFERRAL: u8 = 0xa3;
const TAG_NEW_SUPERIOR: u8 = 0x80;
const TAG_EXT_REQ_NAME: u8 = 0x80;
const TAG_EXT_REQ_VALUE: u8 = 0x81;
const TAG_EXT_RESP_NAME: u8 = 0x8a;
const TAG_EXT_RESP_VALUE: u8 = 0x8b;

/// Encodes one message into a ready-to-write buffer.
pub fn encode_message(msg: &LdapMessage) -> Bytes {
    let mut w = BerWriter::new();
    let envelope = w.begin(TAG_SEQUENCE);
    w.write_integer(i64::from(msg.id));
    encode_op(&mut w, &msg.op);
    encode_controls(&mut w, &msg.controls);
    w.end(envelope);
    Bytes::from(w.into_bytes())
}

/// Decodes the next complete message out of `buf`, if one is buffered.
///
/// Returns `Ok(None)` when more bytes are needed; nothing is consumed
/// in that case. On success the envelope's bytes are consumed exactly.
/// On error the stream is unrecoverable and must be torn down.
pub fn decode_message(buf: &mut BytesMut) -> ProtocolResult<Option<LdapMessage>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != TAG_SEQUENCE {
        return Err(ProtocolError::UnexpectedTag {
            expected: TAG_SEQUENCE,
            found: buf[0],
        });
    }
    let total = match element_boundary(buf, MAX_MESSAGE_SIZE)? {
        Boundary::Incomplete => return Ok(None),
        Boundary::Complete(total) => total,
    };
    let frame = buf.split_to(total).freeze();
    let mut outer = BerReader::new(&frame);
    let mut body = outer.read_nested(TAG_SEQUENCE)?;

    let id = i32::try_from(body.read_integer()?)
        .map_err(|_| ProtocolError::malformed("messageID", "out of i32 range"))?;
    let (tag, content) = body.read_element()?;
    let op = decode_op(tag, content)?;
    let controls = if !body.is_empty() && body.peek_tag()? == TAG_CONTROLS {
        decode_controls(&mut body)?
    } else {
        Vec::new()
    };
    Ok(Some(LdapMessage { id, op, controls }))
}

fn encode_op(w: &mut BerWriter, op: &ProtocolOp) {
    match op {
        ProtocolOp::BindRequest(req) => {
            let mark = w.begin(TAG_BIND_REQUEST);
            w.write_integer(i64::from(req.version));
            w.write_string(&req.dn);
            match &req.auth {
                BindAuth::Simple(password) => {
                    w.write_element(TAG_AUTH_SIMPLE, password.as_bytes());
                }
                BindAuth::Sasl {
                    mechanism,
                    credentials,
                } => {
                    let sasl = w.begin(TAG_AUTH_SASL);
                    w.write_string(mechanism);
                    if let Some(creds) = credentials {
                        w.write_octets(creds);
                    }
                    w.end(sasl);
                }
            }
            w.end(mark);
        }
        ProtocolOp::BindResponse(resp) => {
            let mark = w.begin(TAG_BIND_RESPONSE);
            encode_result(w, &resp.result);
            if let Some(creds) = &resp.server_sasl_creds {
                w.write_element(TAG_SASL_CREDS, creds);
            }
            w.end(mark);
        }
        ProtocolOp::UnbindRequest => w.write_element(TAG_UNBIND_REQUEST, &[]),
        ProtocolOp::SearchRequest(req) => {
            let mark = w.begin(TAG_SEARCH_REQUEST);
            w.write_string(&req.base);
            w.write_enumerated(i64::from(req.scope.as_u8()));
            w.write_enumerated(i64::from(req.deref.as_u8()));
            w.write_integer(i64::from(req.size_limit));
            w.write_integer(i64::from(req.time_limit));
            w.write_bool(req.types_only);
            req.filter.encode(w);
            let attrs = w.begin(TAG_SEQUENCE);
            for attr in &req.attrs {
                w.write_string(attr);
            }
            w.end(attrs);
            w.end(mark);
        }
        ProtocolOp::SearchResultEntry(entry) => {
            let mark = w.begin(TAG_SEARCH_ENTRY);
            w.write_string(&entry.dn);
            let attrs = w.begin(TAG_SEQUENCE);
            for attr in &entry.attrs {
                encode_attribute(w, attr);
            }
            w.end(attrs);
            w.end(mark);
        }
        ProtocolOp::SearchResultReference(urls) => {
            let mark = w.begin(TAG_SEARCH_REFERENCE);
            for url in urls {
                w.write_string(url);
            }
            w.end(mark);
        }
        ProtocolOp::SearchResultDone(result) => encode_result_op(w, TAG_SEARCH_DONE, result),
        ProtocolOp::ModifyRequest(req) => {
            let mark = w.begin(TAG_MODIFY_REQUEST);
            w.write_string(&req.dn);
            let changes = w.begin(TAG_SEQUENCE);
            for change in &req.changes {
                let item = w.begin(TAG_SEQUENCE);
                w.write_enumerated(i64::from(change.op.as_u8()));
                encode_attribute(w, &change.attr);
                w.end(item);
            }
            w.end(changes);
            w.end(mark);
        }
        ProtocolOp::ModifyResponse(result) => encode_result_op(w, TAG_MODIFY_RESPONSE, result),
        ProtocolOp::AddRequest(req) => {
            let mark = w.begin(TAG_ADD_REQUEST);
            w.write_string(&req.dn);
            let attrs = w.begin(TAG_SEQUENCE);
            for attr in &req.attrs {
                encode_attribute(w, attr);
            }
            w.end(attrs);
            w.end(mark);
        }
        ProtocolOp::AddResponse(result) => encode_result_op(w, TAG_ADD_RESPONSE, result),
        ProtocolOp::DelRequest(dn) => w.write_element(TAG_DEL_REQUEST, dn.as_bytes()),
        ProtocolOp::DelResponse(result) => encode_result_op(w, TAG_DEL_RESPONSE, result),
        ProtocolOp::ModifyDnRequest(req) => {
            let mark = w.begin(TAG_MODIFY_DN_REQUEST);
            w.write_string(&req.dn);
            w.write_string(&req.new_rdn);
            w.write_bool(req.delete_old_rdn);
            if let Some(superior) = &req.new_superior {
                w.write_element(TAG_NEW_SUPERIOR, superior.as_bytes());
            }
            w.end(mark);
        }
        ProtocolOp::ModifyDnResponse(result) => {
            encode_result_op(w, TAG_MODIFY_DN_RESPONSE, result)
        }
        ProtocolOp::CompareRequest(req) => {
            let mark = w.begin(TAG_COMPARE_REQUEST);
            w.write_string(&req.dn);
            let ava = w.begin(TAG_SEQUENCE);
            w.write_string(&req.attr);
            w.write_octets(&req.value);
            w.end(ava);
            w.end(mark);
        }
        ProtocolOp::CompareResponse(result) => encode_result_op(w, TAG_COMPARE_RESPONSE, result),
        ProtocolOp::AbandonRequest(id) => {
            // Abandon is primitive: the integer body sits directly
            // under the application tag.
            w.write_element(TAG_ABANDON_REQUEST, &crate::ber::integer_body(i64::from(*id)));
        }
        ProtocolOp::ExtendedRequest(req) => {
            let mark = w.begin(TAG_EXTENDED_REQUEST);
            w.write_element(TAG_EXT_REQ_NAME, req.name.as_bytes());
            if let Some(value) = &req.value {
                w.write_element(TAG_EXT_REQ_VALUE, value);
            }
            w.end(mark);
        }
        ProtocolOp::ExtendedResponse(resp) => {
            let mark = w.begin(TAG_EXTENDED_RESPONSE);
            encode_result(w, &resp.result);
            if let Some(name) = &resp.name {
                w.write_element(TAG_EXT_RESP_NAME, name.as_bytes());
            }
            if let Some(value) = &resp.value {
                w.write_element(TAG_EXT_RESP_VALUE, value);
            }
            w.end(mark);
        }
    }
}

fn decode_op(tag: u8, content: &[u8]) -> ProtocolResult<ProtocolOp> {
    let mut r = BerReader::new(content);
    match tag {
        TAG_BIND_REQUEST => {
            let version = r.read_integer()? as i32;
            let dn = r.read_string("bind dn")?;
            let (auth_tag, auth_body) = r.read_element()?;
            let auth = match auth_tag {
                TAG_AUTH_SIMPLE => BindAuth::Simple(crate::ber::string_from(
                    auth_body,
                    "simple credentials",
                )?),
                TAG_AUTH_SASL => {
                    let mut sasl = BerReader::new(auth_body);
                    let mechanism = sasl.read_string("sasl mechanism")?;
                    let credentials = if sasl.is_empty() {
                        None
                    } else {
                        Some(sasl.read_octets()?.to_vec())
                    };
                    BindAuth::Sasl {
                        mechanism,
                        credentials,
                    }
                }
                found => {
                    return Err(ProtocolError::UnexpectedTag {
                        expected: TAG_AUTH_SIMPLE,
                        found,
                    })
                }
            };
            Ok(ProtocolOp::BindRequest(BindRequest { version, dn, auth }))
        }
        TAG_BIND_RESPONSE => {
            let result = decode_result(&mut r)?;
            let server_sasl_creds = if !r.is_empty() && r.peek_tag()? == TAG_SASL_CREDS {
                Some(r.read_expected(TAG_SASL_CREDS)?.to_vec())
            } else {
                None
            };
            Ok(ProtocolOp::BindResponse(BindResponse {
                result,
                server_sasl_creds,
            }))
        }
        TAG_UNBIND_REQUEST => Ok(ProtocolOp::UnbindRequest),
        TAG_SEARCH_REQUEST => {
            let base = r.read_string("search base")?;
            let scope = Scope::from_i64(r.read_enumerated()?)
                .ok_or(ProtocolError::malformed("searchRequest", "invalid scope"))?;
            let deref = DerefAliases::from_i64(r.read_enumerated()?)
                .ok_or(ProtocolError::malformed("searchRequest", "invalid derefAliases"))?;
            let size_limit = r.read_integer()? as i32;
            let time_limit = r.read_integer()? as i32;
            let types_only = r.read_bool()?;
            let filter = Filter::decode(&mut r)?;
            let mut attr_list = r.read_nested(TAG_SEQUENCE)?;
            let mut attrs = Vec::new();
            while !attr_list.is_empty() {
                attrs.push(attr_list.read_string("requested attribute")?);
            }
            Ok(ProtocolOp::SearchRequest(SearchRequest {
                base,
                scope,
                deref,
                size_limit,
                time_limit,
                types_only,
                filter,
                attrs,
            }))
        }
        TAG_SEARCH_ENTRY => {
            let dn = r.read_string("entry dn")?;
            let mut attr_list = r.read_nested(TAG_SEQUENCE)?;
            let mut attrs = Vec::new();
            while !attr_list.is_empty() {
                attrs.push(decode_attribute(&mut attr_list)?);
            }
            Ok(ProtocolOp::SearchResultEntry(SearchEntry { dn, attrs }))
        }
        TAG_SEARCH_REFERENCE => {
            let mut urls = Vec::new();
            while !r.is_empty() {
                urls.push(r.read_string("reference url")?);
            }
            if urls.is_empty() {
                return Err(ProtocolError::malformed("searchResRef", "no URIs"));
            }
            Ok(ProtocolOp::SearchResultReference(urls))
        }
        TAG_SEARCH_DONE => Ok(ProtocolOp::SearchResultDone(decode_result(&mut r)?)),
        TAG_MODIFY_REQUEST => {
            let dn = r.read_string("modify dn")?;
            let mut change_list = r.read_nested(TAG_SEQUENCE)?;
            let mut changes = Vec::new();
            while !change_list.is_empty() {
                let mut item = change_list.read_nested(TAG_SEQUENCE)?;
                let op = ModifyOp::from_i64(item.read_enumerated()?)
                    .ok_or(ProtocolError::malformed("modifyRequest", "invalid operation"))?;
                let attr = decode_attribute(&mut item)?;
                changes.push(ModifyChange { op, attr });
            }
            Ok(ProtocolOp::ModifyRequest(ModifyRequest { dn, changes }))
        }
        TAG_MODIFY_RESPONSE => Ok(ProtocolOp::ModifyResponse(decode_result(&mut r)?)),
        TAG_ADD_REQUEST => {
            let dn = r.read_string("add dn")?;
            let mut attr_list = r.read_nested(TAG_SEQUENCE)?;
            let mut attrs = Vec::new();
            while !attr_list.is_empty() {
                attrs.push(decode_attribute(&mut attr_list)?);
            }
            Ok(ProtocolOp::AddRequest(AddRequest { dn, attrs }))
        }
        TAG_ADD_RESPONSE => Ok(ProtocolOp::AddResponse(decode_result(&mut r)?)),
        TAG_DEL_REQUEST => Ok(ProtocolOp::DelRequest(crate::ber::string_from(
            content,
            "del dn",
        )?)),
        TAG_DEL_RESPONSE => Ok(ProtocolOp::DelResponse(decode_result(&mut r)?)),
        TAG_MODIFY_DN_REQUEST => {
            let dn = r.read_string("modDN dn")?;
            let new_rdn = r.read_string("newrdn")?;
            let delete_old_rdn = r.read_bool()?;
            let new_superior = if !r.is_empty() && r.peek_tag()? == TAG_NEW_SUPERIOR {
                Some(crate::ber::string_from(
                    r.read_expected(TAG_NEW_SUPERIOR)?,
                    "newSuperior",
                )?)
            } else {
                None
            };
            Ok(ProtocolOp::ModifyDnRequest(ModifyDnRequest {
                dn,
                new_rdn,
                delete_old_rdn,
                new_superior,
            }))
        }
        TAG_MODIFY_DN_RESPONSE => Ok(ProtocolOp::ModifyDnResponse(decode_result(&mut r)?)),
        TAG_COMPARE_REQUEST => {
            let dn = r.read_string("compare dn")?;
            let mut ava = r.read_nested(TAG_SEQUENCE)?;
            let attr = ava.read_string("compare attribute")?;
            let value = ava.read_octets()?.to_vec();
            Ok(ProtocolOp::CompareRequest(CompareRequest { dn, attr, value }))
        }
        TAG_COMPARE_RESPONSE => Ok(ProtocolOp::CompareResponse(decode_result(&mut r)?)),
        TAG_ABANDON_REQUEST => {
            let id = i32::try_from(crate::ber::decode_integer(content)?)
                .map_err(|_| ProtocolError::malformed("abandonRequest", "id out of range"))?;
            Ok(ProtocolOp::AbandonRequest(id))
        }
        TAG_EXTENDED_REQUEST => {
            let name =
                crate::ber::string_from(r.read_expected(TAG_EXT_REQ_NAME)?, "request oid")?;
            let value = if !r.is_empty() && r.peek_tag()? == TAG_EXT_REQ_VALUE {
                Some(r.read_expected(TAG_EXT_REQ_VALUE)?.to_vec())
            } else {
                None
            };
            Ok(ProtocolOp::ExtendedRequest(ExtendedRequest { name, value }))
        }
        TAG_EXTENDED_RESPONSE => {
            let result = decode_result(&mut r)?;
            let name = if !r.is_empty() && r.peek_tag()? == TAG_EXT_RESP_NAME {
                Some(crate::ber::string_from(
                    r.read_expected(TAG_EXT_RESP_NAME)?,
                    "response oid",
                )?)
            } else {
                None
            };
            let value = if !r.is_empty() && r.peek_tag()? == TAG_EXT_RESP_VALUE {
                Some(r.read_expected(TAG_EXT_RESP_VALUE)?.to_vec())
            } else {
                None
            };
            Ok(ProtocolOp::ExtendedResponse(ExtendedResponse {
                result,
                name,
                value,
            }))
        }
        tag => Err(ProtocolError::UnknownOp { tag }),
    }
}

fn encode_result_op(w: &mut BerWriter, tag: u8, result: &LdapResult) {
    let mark = w.begin(tag);
    encode_result(w, result);
    w.end(mark);
}

fn encode_result(w: &mut BerWriter, result: &LdapResult) {
    w.write_enumerated(i64::from(result.code.as_u32()));
    w.write_string(&result.matched_dn);
    w.write_string(&result.diagnostic);
    if !result.referral.is_empty() {
        let mark = w.begin(TAG_REFERRAL);
        for url in &result.referral {
            w.write_string(url);
        }
        w.end(mark);
    }
}

fn decode_result(r: &mut BerReader<'_>) -> ProtocolResult<LdapResult> {
    let raw = r.read_enumerated()?;
    let code = u32::try_from(raw)
        .map(ResultCode::from_u32)
        .map_err(|_| ProtocolError::malformed("LDAPResult", "negative result code"))?;
    let matched_dn = r.read_string("matchedDN")?;
    let diagnostic = r.read_string("diagnosticMessage")?;
    let mut referral = Vec::new();
    if !r.is_empty() && r.peek_tag()? == TAG_REFERRAL {
        let mut urls = r.read_nested(TAG_REFERRAL)?;
        while !urls.is_empty() {
            referral.push(urls.read_string("referral url")?);
        }
    }
    Ok(LdapResult {
        code,
        matched_dn,
        diagnostic,
        referral,
    })
}

fn encode_attribute(w: &mut BerWriter, attr: &Attribute) {
    let mark = w.begin(TAG_SEQUENCE);
    w.write_string(&attr.name);
    let values = w.begin(TAG_SET);
    for value in &attr.values {
        w.write_octets(value);
    }
    w.end(values);
    w.end(mark);
}

fn decode_attribute(r: &mut BerReader<'_>) -> ProtocolResult<Attribute> {
    let mut body = r.read_nested(TAG_SEQUENCE)?;
    let name = body.read_string("attribute type")?;
    let mut value_set = body.read_nested(TAG_SET)?;
    let mut values = Vec::new();
    while !value_set.is_empty() {
        values.push(value_set.read_octets()?.to_vec());
    }
    Ok(Attribute { name, values })
}
