//! SAML metadata records.

use chrono::{DateTime, Utc};

/// SAML 2.0 metadata namespace.
pub const METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

/// XML digital signature namespace (holds `KeyInfo`).
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// A protocol endpoint (`SingleSignOnService`, `SingleLogoutService`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
}

/// `IDPSSODescriptor` role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpSsoDescriptor {
    pub protocol_support_enumeration: String,
    pub want_authn_requests_signed: bool,
    /// Base64 DER certificates usable for signature verification.
    pub signing_certificates: Vec<String>,
    /// Base64 DER certificates usable for encryption.
    pub encryption_certificates: Vec<String>,
    pub single_sign_on_services: Vec<Endpoint>,
    pub single_logout_services: Vec<Endpoint>,
    pub name_id_formats: Vec<String>,
}

impl IdpSsoDescriptor {
    /// Location of the SSO endpoint for `binding`.
    pub fn sso_location(&self, binding: &str) -> Option<&str> {
        find_location(&self.single_sign_on_services, binding)
    }

    /// Location of the SLO endpoint for `binding`.
    pub fn slo_location(&self, binding: &str) -> Option<&str> {
        find_location(&self.single_logout_services, binding)
    }
}

fn find_location<'a>(endpoints: &'a [Endpoint], binding: &str) -> Option<&'a str> {
    endpoints
        .iter()
        .find(|e| e.binding == binding)
        .map(|e| e.location.as_str())
}

/// A single federation entity (`EntityDescriptor`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub valid_until: Option<DateTime<Utc>>,
    /// Raw `cacheDuration` (xs:duration), kept unparsed.
    pub cache_duration: Option<String>,
    pub idp_sso_descriptors: Vec<IdpSsoDescriptor>,
    /// Number of `SPSSODescriptor` roles; their content is not parsed.
    pub sp_sso_descriptor_count: usize,
}

impl EntityDescriptor {
    /// Whether this entity can act as an identity provider.
    pub fn has_idp_sso_descriptor(&self) -> bool {
        !self.idp_sso_descriptors.is_empty()
    }

    /// SSO location for `binding` across all IdP roles.
    pub fn sso_location(&self, binding: &str) -> Option<&str> {
        self.idp_sso_descriptors
            .iter()
            .find_map(|d| d.sso_location(binding))
    }

    /// All IdP signing certificates.
    pub fn signing_certificates(&self) -> impl Iterator<Item = &str> {
        self.idp_sso_descriptors
            .iter()
            .flat_map(|d| d.signing_certificates.iter().map(String::as_str))
    }

    /// Whether `validUntil` is set and already passed.
    pub fn is_expired(&self) -> bool {
        self.valid_until.map(|t| t < Utc::now()).unwrap_or(false)
    }
}

/// A collection of entities (`EntitiesDescriptor`), in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitiesDescriptor {
    pub name: Option<String>,
    pub entity_descriptors: Vec<EntityDescriptor>,
}

impl EntitiesDescriptor {
    /// First entity exposing an `IDPSSODescriptor`.
    pub fn first_idp(&self) -> Option<&EntityDescriptor> {
        self.entity_descriptors
            .iter()
            .find(|e| e.has_idp_sso_descriptor())
    }
}
