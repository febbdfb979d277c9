//! Search filters as a structural tree.
//!
//! Filters are built programmatically with the constructors below; there
//! is deliberately no parser for the RFC 4515 string form here.

use crate::ber::{BerReader, BerWriter};
use crate::error::{ProtocolError, ProtocolResult};

const TAG_AND: u8 = 0xa0;
const TAG_OR: u8 = 0xa1;
const TAG_NOT: u8 = 0xa2;
const TAG_EQUALITY: u8 = 0xa3;
const TAG_SUBSTRINGS: u8 = 0xa4;
const TAG_GREATER_OR_EQUAL: u8 = 0xa5;
const TAG_LESS_OR_EQUAL: u8 = 0xa6;
const TAG_PRESENT: u8 = 0x87;
const TAG_APPROX: u8 = 0xa8;

const TAG_SUB_INITIAL: u8 = 0x80;
const TAG_SUB_ANY: u8 = 0x81;
const TAG_SUB_FINAL: u8 = 0x82;

/// A search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality {
        attr: String,
        value: Vec<u8>,
    },
    Substrings {
        attr: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        last: Option<Vec<u8>>,
    },
    GreaterOrEqual {
        attr: String,
        value: Vec<u8>,
    },
    LessOrEqual {
        attr: String,
        value: Vec<u8>,
    },
    Present(String),
    Approx {
        attr: String,
        value: Vec<u8>,
    },
}

impl Filter {
    /// `(attr=value)`
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equality {
            attr: attr.into(),
            value: value.into().into_bytes(),
        }
    }

    /// `(attr=*)`
    pub fn present(attr: impl Into<String>) -> Self {
        Filter::Present(attr.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// `(attr>=value)`
    pub fn ge(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::GreaterOrEqual {
            attr: attr.into(),
            value: value.into().into_bytes(),
        }
    }

    /// `(attr<=value)`
    pub fn le(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::LessOrEqual {
            attr: attr.into(),
            value: value.into().into_bytes(),
        }
    }

    /// `(attr~=value)`
    pub fn approx(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Approx {
            attr: attr.into(),
            value: value.into().into_bytes(),
        }
    }

    /// `(attr=initial*any*...*last)`
    pub fn substrings(
        attr: impl Into<String>,
        initial: Option<&str>,
        any: &[&str],
        last: Option<&str>,
    ) -> Self {
        Filter::Substrings {
            attr: attr.into(),
            initial: initial.map(|s| s.as_bytes().to_vec()),
            any: any.iter().map(|s| s.as_bytes().to_vec()).collect(),
            last: last.map(|s| s.as_bytes().to_vec()),
        }
    }

    pub(crate) fn encode(&self, w: &mut BerWriter) {
        match self {
            Filter::And(filters) => {
                let mark = w.begin(TAG_AND);
                for f in filters {
                    f.encode(w);
                }
                w.end(mark);
            }
            Filter::Or(filters) => {
                let mark = w.begin(TAG_OR);
                for f in filters {
                    f.encode(w);
                }
                w.end(mark);
            }
            Filter::Not(inner) => {
                let mark = w.begin(TAG_NOT);
                inner.encode(w);
                w.end(mark);
            }
            Filter::Equality { attr, value } => encode_ava(w, TAG_EQUALITY, attr, value),
            Filter::GreaterOrEqual { attr, value } => {
                encode_ava(w, TAG_GREATER_OR_EQUAL, attr, value)
            }
            Filter::LessOrEqual { attr, value } => encode_ava(w, TAG_LESS_OR_EQUAL, attr, value),
            Filter::Approx { attr, value } => encode_ava(w, TAG_APPROX, attr, value),
            Filter::Present(attr) => w.write_element(TAG_PRESENT, attr.as_bytes()),
            Filter::Substrings {
                attr,
                initial,
                any,
                last,
            } => {
                let mark = w.begin(TAG_SUBSTRINGS);
                w.write_string(attr);
                let seq = w.begin(crate::ber::TAG_SEQUENCE);
                if let Some(initial) = initial {
                    w.write_element(TAG_SUB_INITIAL, initial);
                }
                for part in any {
                    w.write_element(TAG_SUB_ANY, part);
                }
                if let Some(last) = last {
                    w.write_element(TAG_SUB_FINAL, last);
                }
                w.end(seq);
                w.end(mark);
            }
        }
    }

    pub(crate) fn decode(r: &mut BerReader<'_>) -> ProtocolResult<Filter> {
        let (tag, content) = r.read_element()?;
        let mut body = BerReader::new(content);
        match tag {
            TAG_AND | TAG_OR => {
                let mut filters = Vec::new();
                while !body.is_empty() {
                    filters.push(Filter::decode(&mut body)?);
                }
                Ok(if tag == TAG_AND {
                    Filter::And(filters)
                } else {
                    Filter::Or(filters)
                })
            }
            TAG_NOT => Ok(Filter::Not(Box::new(Filter::decode(&mut body)?))),
            TAG_EQUALITY | TAG_GREATER_OR_EQUAL | TAG_LESS_OR_EQUAL | TAG_APPROX => {
                let attr = body.read_string("filter attribute")?;
                let value = body.read_octets()?.to_vec();
                Ok(match tag {
                    TAG_EQUALITY => Filter::Equality { attr, value },
                    TAG_GREATER_OR_EQUAL => Filter::GreaterOrEqual { attr, value },
                    TAG_LESS_OR_EQUAL => Filter::LessOrEqual { attr, value },
                    _ => Filter::Approx { attr, value },
                })
            }
            TAG_PRESENT => Ok(Filter::Present(crate::ber::string_from(
                content,
                "present filter",
            )?)),
            TAG_SUBSTRINGS => {
                let attr = body.read_string("substrings attribute")?;
                let mut parts = body.read_nested(crate::ber::TAG_SEQUENCE)?;
                let mut initial = None;
                let mut any = Vec::new();
                let mut last = None;
                while !parts.is_empty() {
                    let (part_tag, part) = parts.read_element()?;
                    match part_tag {
                        TAG_SUB_INITIAL => initial = Some(part.to_vec()),
                        TAG_SUB_ANY => any.push(part.to_vec()),
                        TAG_SUB_FINAL => last = Some(part.to_vec()),
                        found => {
                            return Err(ProtocolError::UnexpectedTag {
                                expected: TAG_SUB_ANY,
                                found,
                            })
                        }
                    }
                }
                Ok(Filter::Substrings {
                    attr,
                    initial,
                    any,
                    last,
                })
            }
            tag => Err(ProtocolError::UnknownOp { tag }),
        }
    }
}

fn encode_ava(w: &mut BerWriter, tag: u8, attr: &str, value: &[u8]) {
    let mark = w.begin(tag);
    w.write_string(attr);
    w.write_octets(value);
    w.end(mark);
}
