//! LDAP wire protocol model and BER codec.
//!
//! This crate owns everything that touches raw LDAP bytes: the message
//! model ([`LdapMessage`], [`ProtocolOp`]), search filters, controls,
//! and the incremental codec that turns a byte stream into messages.
//! It knows nothing about sockets, pooling, or correlation; that logic
//! lives in `xavyo-ldap-client`.

pub mod ber;
pub mod codec;
pub mod control;
pub mod error;
pub mod filter;
pub mod message;

pub use codec::{decode_message, encode_message, MAX_MESSAGE_SIZE};
pub use control::Control;
pub use error::{ProtocolError, ProtocolResult};
pub use filter::Filter;
pub use message::{
    AddRequest, Attribute, BindAuth, BindRequest, BindResponse, CompareRequest, DerefAliases,
    ExtendedRequest, ExtendedResponse, LdapMessage, LdapResult, MessageId, ModifyChange,
    ModifyDnRequest, ModifyOp, ModifyRequest, ProtocolOp, ResultCode, Scope, SearchEntry,
    SearchRequest, NOTICE_OF_DISCONNECTION, UNSOLICITED_ID,
};
