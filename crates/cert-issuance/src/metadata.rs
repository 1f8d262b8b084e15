//! Certificate requests and the documents derived from them.
//!
//! `CertificateMetadata` is the off-chain JSON document pinned to the
//! content store. `OnChainMetadata` is the prefix of the token-metadata
//! account the ledger keeps for every certificate.

use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::content::ContentUri;
use crate::error::{LedgerError, ValidationError};

/// Trait names in document order.
pub const TRAIT_VEGETATION_COVERAGE: &str = "Vegetation Coverage";
pub const TRAIT_HECTARES: &str = "Hectares";
pub const TRAIT_SPECIFIC_ATTRIBUTES: &str = "Specific Attributes";
pub const TRAIT_WATER_BODIES: &str = "Water Bodies";
pub const TRAIT_SPRINGS: &str = "Springs";
pub const TRAIT_ONGOING_PROJECTS: &str = "Ongoing Projects";
pub const TRAIT_CAR_REGISTRY: &str = "CAR Registry";

/// Name, symbol and description stamped onto every certificate.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateTemplate {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for CertificateTemplate {
    fn default() -> Self {
        Self {
            name: default_name(),
            symbol: default_symbol(),
            description: default_description(),
        }
    }
}

fn default_name() -> String {
    "Preservation Certificate".to_string()
}

fn default_symbol() -> String {
    "CPNFT".to_string()
}

fn default_description() -> String {
    "Certificate of Environmental Preservation".to_string()
}

/// Structured evidence submitted with a certificate request. Values are kept
/// as the strings the client sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateAttributes {
    pub vegetation_coverage: String,
    pub hectares_number: String,
    pub specific_attributes: String,
    pub water_bodies_count: String,
    pub springs_count: String,
    pub ongoing_projects: String,
    pub car_registry: String,
}

impl CertificateAttributes {
    fn to_traits(&self) -> Vec<Attribute> {
        [
            (TRAIT_VEGETATION_COVERAGE, &self.vegetation_coverage),
            (TRAIT_HECTARES, &self.hectares_number),
            (TRAIT_SPECIFIC_ATTRIBUTES, &self.specific_attributes),
            (TRAIT_WATER_BODIES, &self.water_bodies_count),
            (TRAIT_SPRINGS, &self.springs_count),
            (TRAIT_ONGOING_PROJECTS, &self.ongoing_projects),
            (TRAIT_CAR_REGISTRY, &self.car_registry),
        ]
        .into_iter()
        .map(|(trait_type, value)| Attribute {
            trait_type: trait_type.to_string(),
            value: value.clone(),
        })
        .collect()
    }
}

/// Where the certificate image comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Already pinned; the upload step is skipped.
    Uri(ContentUri),
    /// Raw bytes still to be pinned.
    Bytes { bytes: Vec<u8>, file_name: String },
}

/// One inbound issuance request.
#[derive(Clone, Debug)]
pub struct CertificateRequest {
    /// Free-form caller identity, used only for logging.
    pub requester: Option<String>,
    pub image: ImageSource,
    pub attributes: CertificateAttributes,
    pub recipient: Option<String>,
}

impl CertificateRequest {
    /// Check the request without touching any external system. Returns the
    /// parsed recipient, if one was given.
    pub fn validate(&self) -> Result<Option<Pubkey>, ValidationError> {
        match &self.image {
            ImageSource::Uri(_) => {}
            ImageSource::Bytes { bytes, .. } if bytes.is_empty() => {
                return Err(ValidationError::MissingField("image"));
            }
            ImageSource::Bytes { .. } => {}
        }
        match self.recipient.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_address("recipientAddress", raw).map(Some),
        }
    }
}

/// Parse a base58 ledger address, naming the offending field on failure.
pub fn parse_address(field: &'static str, raw: &str) -> Result<Pubkey, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Pubkey::from_str(raw).map_err(|_| ValidationError::InvalidAddress {
        field,
        value: raw.to_string(),
    })
}

/// A `{trait_type, value}` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

/// Off-chain certificate document. Field order is part of the format:
/// identical requests must serialize to identical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<Attribute>,
}

impl CertificateMetadata {
    pub fn build(
        template: &CertificateTemplate,
        image: &ContentUri,
        attributes: &CertificateAttributes,
    ) -> Self {
        Self {
            name: template.name.clone(),
            symbol: template.symbol.clone(),
            description: template.description.clone(),
            image: image.to_string(),
            attributes: attributes.to_traits(),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn attribute(&self, trait_type: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.trait_type == trait_type)
            .map(|a| a.value.as_str())
    }
}

/// Account-type tag of a version 1 token-metadata account.
const METADATA_V1_KEY: u8 = 4;

#[derive(BorshSerialize, BorshDeserialize)]
struct MetadataPrefix {
    key: u8,
    update_authority: [u8; 32],
    mint: [u8; 32],
    name: String,
    symbol: String,
    uri: String,
}

/// The fixed prefix of a token-metadata account. Strings are stored padded
/// with NULs; decoding strips them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnChainMetadata {
    pub update_authority: Pubkey,
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl OnChainMetadata {
    pub fn decode(data: &[u8]) -> Result<Self, LedgerError> {
        let mut slice = data;
        let prefix = MetadataPrefix::deserialize(&mut slice)
            .map_err(|e| LedgerError::Decode(format!("metadata account: {e}")))?;
        if prefix.key != METADATA_V1_KEY {
            return Err(LedgerError::Decode(format!(
                "metadata account has key {}, expected {METADATA_V1_KEY}",
                prefix.key
            )));
        }
        Ok(Self {
            update_authority: Pubkey::new_from_array(prefix.update_authority),
            mint: Pubkey::new_from_array(prefix.mint),
            name: strip_padding(prefix.name),
            symbol: strip_padding(prefix.symbol),
            uri: strip_padding(prefix.uri),
        })
    }

    /// Encode as the token-metadata program lays the account out, padding
    /// strings to their maximum lengths.
    #[cfg(any(test, feature = "testing"))]
    pub fn to_account_data(&self) -> Vec<u8> {
        use crate::mint::{MAX_NAME_LEN, MAX_SYMBOL_LEN, MAX_URI_LEN};

        let pad = |s: &str, len: usize| {
            let mut padded = s.to_string();
            while padded.len() < len {
                padded.push('\0');
            }
            padded
        };
        let prefix = MetadataPrefix {
            key: METADATA_V1_KEY,
            update_authority: self.update_authority.to_bytes(),
            mint: self.mint.to_bytes(),
            name: pad(&self.name, MAX_NAME_LEN),
            symbol: pad(&self.symbol, MAX_SYMBOL_LEN),
            uri: pad(&self.uri, MAX_URI_LEN),
        };
        let mut data = borsh::to_vec(&prefix).unwrap_or_default();
        // seller fee, no creators, primary-sale flag, mutable flag
        data.extend_from_slice(&[0, 0, 0, 0, 1]);
        data
    }
}

fn strip_padding(value: String) -> String {
    value.trim_end_matches('\0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> CertificateAttributes {
        CertificateAttributes {
            vegetation_coverage: "85".into(),
            hectares_number: "120".into(),
            specific_attributes: "Atlantic forest remnant".into(),
            water_bodies_count: "3".into(),
            springs_count: "2".into(),
            ongoing_projects: "Reforestation".into(),
            car_registry: "SP-3550308-0A1B2C3D".into(),
        }
    }

    #[test]
    fn document_has_traits_in_order() {
        let image = ContentUri::from_cid("bafyimage");
        let doc = CertificateMetadata::build(&CertificateTemplate::default(), &image, &attributes());
        let names: Vec<&str> = doc.attributes.iter().map(|a| a.trait_type.as_str()).collect();
        assert_eq!(
            names,
            [
                "Vegetation Coverage",
                "Hectares",
                "Specific Attributes",
                "Water Bodies",
                "Springs",
                "Ongoing Projects",
                "CAR Registry",
            ]
        );
        assert_eq!(doc.attribute(TRAIT_VEGETATION_COVERAGE), Some("85"));
        assert_eq!(doc.image, "ipfs://bafyimage");
        assert_eq!(doc.symbol, "CPNFT");
    }

    #[test]
    fn document_field_order_is_stable() {
        let image = ContentUri::from_cid("bafyimage");
        let doc = CertificateMetadata::build(&CertificateTemplate::default(), &image, &attributes());
        let json = String::from_utf8(doc.to_json_bytes().unwrap()).unwrap();
        let positions: Vec<usize> = ["\"name\"", "\"symbol\"", "\"description\"", "\"image\"", "\"attributes\""]
            .iter()
            .map(|k| json.find(k).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        assert_eq!(doc.to_json_bytes().unwrap(), doc.clone().to_json_bytes().unwrap());
    }

    #[test]
    fn attribute_values_are_kept_verbatim() {
        let mut attrs = attributes();
        attrs.specific_attributes = "  Atlantic forest remnant\n".into();
        attrs.springs_count = " 2 ".into();
        let doc = CertificateMetadata::build(
            &CertificateTemplate::default(),
            &ContentUri::from_cid("bafyimage"),
            &attrs,
        );
        assert_eq!(
            doc.attribute(TRAIT_SPECIFIC_ATTRIBUTES),
            Some("  Atlantic forest remnant\n")
        );
        assert_eq!(doc.attribute(TRAIT_SPRINGS), Some(" 2 "));
    }

    #[test]
    fn request_attributes_from_camel_case() {
        let attrs: CertificateAttributes = serde_json::from_str(
            r#"{"vegetationCoverage":"85","hectaresNumber":"120","carRegistry":"X"}"#,
        )
        .unwrap();
        assert_eq!(attrs.vegetation_coverage, "85");
        assert_eq!(attrs.hectares_number, "120");
        assert_eq!(attrs.springs_count, "");
    }

    #[test]
    fn validate_rejects_bad_recipient() {
        let request = CertificateRequest {
            requester: None,
            image: ImageSource::Uri(ContentUri::from_cid("bafyimage")),
            attributes: attributes(),
            recipient: Some("not-base58!".into()),
        };
        assert_eq!(
            request.validate(),
            Err(ValidationError::InvalidAddress {
                field: "recipientAddress",
                value: "not-base58!".into()
            })
        );
    }

    #[test]
    fn validate_rejects_empty_image() {
        let request = CertificateRequest {
            requester: None,
            image: ImageSource::Bytes {
                bytes: Vec::new(),
                file_name: "a.png".into(),
            },
            attributes: attributes(),
            recipient: None,
        };
        assert_eq!(request.validate(), Err(ValidationError::MissingField("image")));
    }

    #[test]
    fn validate_treats_blank_recipient_as_none() {
        let request = CertificateRequest {
            requester: None,
            image: ImageSource::Uri(ContentUri::from_cid("bafyimage")),
            attributes: attributes(),
            recipient: Some("  ".into()),
        };
        assert_eq!(request.validate(), Ok(None));
    }

    #[test]
    fn onchain_metadata_strips_padding() {
        let header = OnChainMetadata {
            update_authority: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            name: "Preservation Certificate".into(),
            symbol: "CPNFT".into(),
            uri: "ipfs://bafymeta".into(),
        };
        let data = header.to_account_data();
        let decoded = OnChainMetadata::decode(&data).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn onchain_metadata_rejects_wrong_key() {
        let mut data = OnChainMetadata {
            update_authority: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            name: "n".into(),
            symbol: "s".into(),
            uri: "u".into(),
        }
        .to_account_data();
        data[0] = 6;
        assert!(OnChainMetadata::decode(&data).is_err());
    }
}
