//! Typed mesh configuration resources.
//!
//! Each spec is both a `prost` message, decoded from MCP envelope bodies, and
//! a `serde` type, decoded from the JSON served by the debug endpoint. Only
//! the fields the auditors look at are declared.

/// Declares string names for a protobuf enumeration and a serde adapter
/// module that reads either the name or the raw number.
macro_rules! named_enum {
    ($module:ident => $ty:ident { $($variant:ident = $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Protobuf name of the value.
            #[must_use]
            pub fn as_str_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Parses a protobuf name.
            #[must_use]
            pub fn from_str_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        pub(crate) mod $module {
            use serde::de::Error as _;
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
                match super::$ty::try_from(*value) {
                    Ok(known) => serializer.serialize_str(known.as_str_name()),
                    Err(_) => serializer.serialize_i32(*value),
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Repr {
                    Name(String),
                    Number(i32),
                }

                match Repr::deserialize(deserializer)? {
                    Repr::Name(name) => super::$ty::from_str_name(&name)
                        .map(i32::from)
                        .ok_or_else(|| {
                            D::Error::custom(format!(
                                "unknown {} value {name:?}",
                                stringify!($ty)
                            ))
                        }),
                    Repr::Number(number) => Ok(number),
                }
            }
        }
    };
}

pub mod networking;
pub mod security;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `istio.type.v1beta1.WorkloadSelector`.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Pod labels a workload must carry.
    #[prost(btree_map = "string, string", tag = "1")]
    pub match_labels: BTreeMap<String, String>,
}

/// Wire form of a core `NamespaceSpec`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct NamespaceSpec {
    /// Finalizers blocking deletion.
    #[prost(string, repeated, tag = "1")]
    pub finalizers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::security::MtlsMode;
    use super::*;

    #[test]
    fn enum_names_round_trip() {
        assert_eq!(MtlsMode::Strict.as_str_name(), "STRICT");
        assert_eq!(MtlsMode::from_str_name("PERMISSIVE"), Some(MtlsMode::Permissive));
        assert_eq!(MtlsMode::from_str_name("strict"), None);
    }

    #[test]
    fn selector_reads_camel_case() {
        let selector: WorkloadSelector =
            serde_json::from_str(r#"{"matchLabels":{"app":"billing"}}"#).unwrap();
        assert_eq!(selector.match_labels.get("app").map(String::as_str), Some("billing"));
    }
}
