//! LDAP protocol data model.
//!
//! Every PDU on the wire is an [`LdapMessage`]: a message ID, one
//! [`ProtocolOp`], and optional controls. The types here are plain data;
//! encoding lives in [`crate::codec`].

use crate::control::Control;
use crate::filter::Filter;

/// Correlates a response with the request that produced it.
///
/// IDs are assigned by the client, start at 1, and must not be reused
/// while an operation is outstanding. ID 0 is reserved for unsolicited
/// notifications from the server.
pub type MessageId = i32;

/// Message ID carried by unsolicited notifications.
pub const UNSOLICITED_ID: MessageId = 0;

/// OID of the Notice of Disconnection unsolicited notification.
pub const NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";

/// One LDAP PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub id: MessageId,
    pub op: ProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(id: MessageId, op: ProtocolOp) -> Self {
        Self {
            id,
            op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(id: MessageId, op: ProtocolOp, controls: Vec<Control>) -> Self {
        Self { id, op, controls }
    }
}

/// The operation payload of an [`LdapMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchEntry),
    SearchResultReference(Vec<String>),
    SearchResultDone(LdapResult),
    ModifyRequest(ModifyRequest),
    ModifyResponse(LdapResult),
    AddRequest(AddRequest),
    AddResponse(LdapResult),
    DelRequest(String),
    DelResponse(LdapResult),
    ModifyDnRequest(ModifyDnRequest),
    ModifyDnResponse(LdapResult),
    CompareRequest(CompareRequest),
    CompareResponse(LdapResult),
    AbandonRequest(MessageId),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
}

impl ProtocolOp {
    /// True for the response that completes an operation.
    ///
    /// Search entries and references are intermediate; everything else
    /// that flows server to client closes out its message ID.
    pub fn is_terminal_response(&self) -> bool {
        matches!(
            self,
            ProtocolOp::BindResponse(_)
                | ProtocolOp::SearchResultDone(_)
                | ProtocolOp::ModifyResponse(_)
                | ProtocolOp::AddResponse(_)
                | ProtocolOp::DelResponse(_)
                | ProtocolOp::ModifyDnResponse(_)
                | ProtocolOp::CompareResponse(_)
                | ProtocolOp::ExtendedResponse(_)
        )
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest(_) => "bindRequest",
            ProtocolOp::BindResponse(_) => "bindResponse",
            ProtocolOp::UnbindRequest => "unbindRequest",
            ProtocolOp::SearchRequest(_) => "searchRequest",
            ProtocolOp::SearchResultEntry(_) => "searchResEntry",
            ProtocolOp::SearchResultReference(_) => "searchResRef",
            ProtocolOp::SearchResultDone(_) => "searchResDone",
            ProtocolOp::ModifyRequest(_) => "modifyRequest",
            ProtocolOp::ModifyResponse(_) => "modifyResponse",
            ProtocolOp::AddRequest(_) => "addRequest",
            ProtocolOp::AddResponse(_) => "addResponse",
            ProtocolOp::DelRequest(_) => "delRequest",
            ProtocolOp::DelResponse(_) => "delResponse",
            ProtocolOp::ModifyDnRequest(_) => "modDNRequest",
            ProtocolOp::ModifyDnResponse(_) => "modDNResponse",
            ProtocolOp::CompareRequest(_) => "compareRequest",
            ProtocolOp::CompareResponse(_) => "compareResponse",
            ProtocolOp::AbandonRequest(_) => "abandonRequest",
            ProtocolOp::ExtendedRequest(_) => "extendedReq",
            ProtocolOp::ExtendedResponse(_) => "extendedResp",
        }
    }

    /// The operation result, if this op carries one.
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse(r) => Some(&r.result),
            ProtocolOp::SearchResultDone(r)
            | ProtocolOp::ModifyResponse(r)
            | ProtocolOp::AddResponse(r)
            | ProtocolOp::DelResponse(r)
            | ProtocolOp::ModifyDnResponse(r)
            | ProtocolOp::CompareResponse(r) => Some(r),
            ProtocolOp::ExtendedResponse(r) => Some(&r.result),
            _ => None,
        }
    }

    /// Consumes the op, yielding its LDAPResult if it carries one.
    pub fn into_result(self) -> Option<LdapResult> {
        match self {
            ProtocolOp::BindResponse(r) => Some(r.result),
            ProtocolOp::SearchResultDone(r)
            | ProtocolOp::ModifyResponse(r)
            | ProtocolOp::AddResponse(r)
            | ProtocolOp::DelResponse(r)
            | ProtocolOp::ModifyDnResponse(r)
            | ProtocolOp::CompareResponse(r) => Some(r),
            ProtocolOp::ExtendedResponse(r) => Some(r.result),
            _ => None,
        }
    }
}

/// BindRequest: protocol version, bind DN, and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i32,
    pub dn: String,
    pub auth: BindAuth,
}

impl BindRequest {
    /// Simple bind at protocol version 3.
    pub fn simple(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            version: 3,
            dn: dn.into(),
            auth: BindAuth::Simple(password.into()),
        }
    }
}

/// AuthenticationChoice of a BindRequest.
#[derive(Clone, PartialEq, Eq)]
pub enum BindAuth {
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

// Credentials stay out of Debug output.
impl std::fmt::Debug for BindAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindAuth::Simple(_) => f.write_str("Simple(***)"),
            BindAuth::Sasl { mechanism, .. } => {
                f.debug_struct("Sasl").field("mechanism", mechanism).finish()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

/// Search scope relative to the base object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

impl Scope {
    pub fn as_u8(self) -> u8 {
        match self {
            Scope::Base => 0,
            Scope::OneLevel => 1,
            Scope::Subtree => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Scope::Base),
            1 => Some(Scope::OneLevel),
            2 => Some(Scope::Subtree),
            _ => None,
        }
    }
}

/// Alias dereferencing behavior during a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefAliases {
    #[default]
    Never,
    InSearching,
    FindingBase,
    Always,
}

impl DerefAliases {
    pub fn as_u8(self) -> u8 {
        match self {
            DerefAliases::Never => 0,
            DerefAliases::InSearching => 1,
            DerefAliases::FindingBase => 2,
            DerefAliases::Always => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(DerefAliases::Never),
            1 => Some(DerefAliases::InSearching),
            2 => Some(DerefAliases::FindingBase),
            3 => Some(DerefAliases::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub deref: DerefAliases,
    /// 0 means no client-requested limit.
    pub size_limit: i32,
    /// Seconds; 0 means no client-requested limit.
    pub time_limit: i32,
    pub types_only: bool,
    pub filter: Filter,
    pub attrs: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: Scope, filter: Filter) -> Self {
        Self {
            base: base.into(),
            scope,
            deref: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attrs: Vec::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = attrs;
        self
    }
}

/// An attribute name with its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Single string-valued attribute.
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into().into_bytes()],
        }
    }

    /// First value as UTF-8, if present and valid.
    pub fn first_str(&self) -> Option<&str> {
        self.values.first().and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// One entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    pub attrs: Vec<Attribute>,
}

impl SearchEntry {
    pub fn new(dn: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        Self {
            dn: dn.into(),
            attrs,
        }
    }

    /// First value of the named attribute, compared case-insensitively.
    pub fn attr_first(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(Attribute::first_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Add,
    Delete,
    Replace,
}

impl ModifyOp {
    pub fn as_u8(self) -> u8 {
        match self {
            ModifyOp::Add => 0,
            ModifyOp::Delete => 1,
            ModifyOp::Replace => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ModifyOp::Add),
            1 => Some(ModifyOp::Delete),
            2 => Some(ModifyOp::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyChange {
    pub op: ModifyOp,
    pub attr: Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<ModifyChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attr: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    /// Request OID.
    pub name: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

/// The LDAPResult every completing response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic: String,
    /// Referral URLs, present when `code` is [`ResultCode::Referral`].
    pub referral: Vec<String>,
}

impl LdapResult {
    pub fn success() -> Self {
        Self::with_code(ResultCode::Success)
    }

    pub fn with_code(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic: String::new(),
            referral: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    pub fn is_referral(&self) -> bool {
        self.code == ResultCode::Referral
    }
}

/// LDAP result codes, with unrecognized values preserved verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    AuthMethodNotSupported,
    StrongerAuthRequired,
    Referral,
    AdminLimitExceeded,
    UnavailableCriticalExtension,
    NoSuchAttribute,
    UndefinedAttributeType,
    NoSuchObject,
    InvalidDnSyntax,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    EntryAlreadyExists,
    Other(u32),
}

impl ResultCode {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ResultCode::Success,
            1 => ResultCode::OperationsError,
            2 => ResultCode::ProtocolError,
            3 => ResultCode::TimeLimitExceeded,
            4 => ResultCode::SizeLimitExceeded,
            5 => ResultCode::CompareFalse,
            6 => ResultCode::CompareTrue,
            7 => ResultCode::AuthMethodNotSupported,
            8 => ResultCode::StrongerAuthRequired,
            10 => ResultCode::Referral,
            11 => ResultCode::AdminLimitExceeded,
            12 => ResultCode::UnavailableCriticalExtension,
            16 => ResultCode::NoSuchAttribute,
            17 => ResultCode::UndefinedAttributeType,
            32 => ResultCode::NoSuchObject,
            34 => ResultCode::InvalidDnSyntax,
            49 => ResultCode::InvalidCredentials,
            50 => ResultCode::InsufficientAccessRights,
            51 => ResultCode::Busy,
            52 => ResultCode::Unavailable,
            53 => ResultCode::UnwillingToPerform,
            68 => ResultCode::EntryAlreadyExists,
            other => ResultCode::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::TimeLimitExceeded => 3,
            ResultCode::SizeLimitExceeded => 4,
            ResultCode::CompareFalse => 5,
            ResultCode::CompareTrue => 6,
            ResultCode::AuthMethodNotSupported => 7,
            ResultCode::StrongerAuthRequired => 8,
            ResultCode::Referral => 10,
            ResultCode::AdminLimitExceeded => 11,
            ResultCode::UnavailableCriticalExtension => 12,
            ResultCode::NoSuchAttribute => 16,
            ResultCode::UndefinedAttributeType => 17,
            ResultCode::NoSuchObject => 32,
            ResultCode::InvalidDnSyntax => 34,
            ResultCode::InvalidCredentials => 49,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::Busy => 51,
            ResultCode::Unavailable => 52,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::EntryAlreadyExists => 68,
            ResultCode::Other(v) => v,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.as_u32(), self)
    }
}
