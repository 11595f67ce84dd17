//! Root-element dispatch and IdP entity selection.

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use super::types::{
    Endpoint, EntitiesDescriptor, EntityDescriptor, IdpSsoDescriptor, METADATA_NS, XMLDSIG_NS,
};
use super::MetadataError;

/// A parsed metadata document, by root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDocument {
    Entity(EntityDescriptor),
    Entities(EntitiesDescriptor),
}

/// Parse a metadata document, choosing the schema from the root element.
pub fn parse_metadata(xml: &[u8]) -> Result<MetadataDocument, MetadataError> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| MetadataError::Parse(format!("metadata is not valid UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');

    let doc = Document::parse(text).map_err(|e| MetadataError::Parse(e.to_string()))?;
    let root = doc.root_element();

    if is_md(&root, "EntityDescriptor") {
        parse_entity(root).map(MetadataDocument::Entity)
    } else if is_md(&root, "EntitiesDescriptor") {
        let mut entities = EntitiesDescriptor {
            name: root.attribute("Name").map(String::from),
            entity_descriptors: Vec::new(),
        };
        collect_entities(root, &mut entities.entity_descriptors)?;
        Ok(MetadataDocument::Entities(entities))
    } else {
        let tag = root.tag_name();
        Err(MetadataError::UnexpectedRoot(match tag.namespace() {
            Some(ns) => format!("{{{}}}{}", ns, tag.name()),
            None => tag.name().to_string(),
        }))
    }
}

/// Resolve the IdP entity described by a metadata document.
///
/// A single `EntityDescriptor` is returned as-is. For an `EntitiesDescriptor`
/// the first entity (document order) with an `IDPSSODescriptor` wins.
pub fn select_entity(xml: &[u8]) -> Result<EntityDescriptor, MetadataError> {
    match parse_metadata(xml)? {
        MetadataDocument::Entity(entity) => {
            if !entity.has_idp_sso_descriptor() {
                warn!(
                    entity_id = %entity.entity_id,
                    "IdP metadata entity has no IDPSSODescriptor"
                );
            }
            Ok(entity)
        }
        MetadataDocument::Entities(entities) => {
            debug!(
                entities = entities.entity_descriptors.len(),
                "Selecting IdP from EntitiesDescriptor"
            );
            entities
                .entity_descriptors
                .into_iter()
                .find(|e| e.has_idp_sso_descriptor())
                .ok_or(MetadataError::NoIdpEntity)
        }
    }
}

fn is_md(node: &Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(METADATA_NS)
}

fn collect_entities(node: Node, out: &mut Vec<EntityDescriptor>) -> Result<(), MetadataError> {
    for child in node.children().filter(|n| n.is_element()) {
        if is_md(&child, "EntityDescriptor") {
            out.push(parse_entity(child)?);
        } else if is_md(&child, "EntitiesDescriptor") {
            collect_entities(child, out)?;
        }
    }
    Ok(())
}

fn parse_entity(node: Node) -> Result<EntityDescriptor, MetadataError> {
    let entity_id = node
        .attribute("entityID")
        .ok_or_else(|| MetadataError::Parse("EntityDescriptor is missing entityID".to_string()))?
        .to_string();

    let valid_until = node.attribute("validUntil").map(parse_timestamp).transpose()?;

    let idp_sso_descriptors = node
        .children()
        .filter(|n| is_md(n, "IDPSSODescriptor"))
        .map(parse_idp_sso)
        .collect::<Result<Vec<_>, _>>()?;

    let sp_sso_descriptor_count = node
        .children()
        .filter(|n| is_md(n, "SPSSODescriptor"))
        .count();

    Ok(EntityDescriptor {
        entity_id,
        valid_until,
        cache_duration: node.attribute("cacheDuration").map(String::from),
        idp_sso_descriptors,
        sp_sso_descriptor_count,
    })
}

fn parse_idp_sso(node: Node) -> Result<IdpSsoDescriptor, MetadataError> {
    let mut descriptor = IdpSsoDescriptor {
        protocol_support_enumeration: node
            .attribute("protocolSupportEnumeration")
            .unwrap_or_default()
            .to_string(),
        want_authn_requests_signed: matches!(
            node.attribute("WantAuthnRequestsSigned"),
            Some("true") | Some("1")
        ),
        ..Default::default()
    };

    for child in node.children().filter(|n| n.is_element()) {
        if is_md(&child, "KeyDescriptor") {
            let certs: Vec<String> = child
                .descendants()
                .filter(|n| {
                    n.tag_name().name() == "X509Certificate"
                        && n.tag_name().namespace() == Some(XMLDSIG_NS)
                })
                .filter_map(|n| n.text())
                .map(|t| t.split_whitespace().collect::<String>())
                .collect();

            // No `use` attribute means the key serves both purposes.
            match child.attribute("use") {
                Some("signing") => descriptor.signing_certificates.extend(certs),
                Some("encryption") => descriptor.encryption_certificates.extend(certs),
                _ => {
                    descriptor.signing_certificates.extend(certs.iter().cloned());
                    descriptor.encryption_certificates.extend(certs);
                }
            }
        } else if is_md(&child, "SingleSignOnService") {
            descriptor.single_sign_on_services.extend(parse_endpoint(child));
        } else if is_md(&child, "SingleLogoutService") {
            descriptor.single_logout_services.extend(parse_endpoint(child));
        } else if is_md(&child, "NameIDFormat") {
            if let Some(format) = child.text().map(str::trim).filter(|t| !t.is_empty()) {
                descriptor.name_id_formats.push(format.to_string());
            }
        }
    }

    Ok(descriptor)
}

/// Endpoint from `Binding` and `Location`; `None` (and a warning) if either is absent.
fn parse_endpoint(node: Node) -> Option<Endpoint> {
    match (node.attribute("Binding"), node.attribute("Location")) {
        (Some(binding), Some(location)) => Some(Endpoint {
            binding: binding.to_string(),
            location: location.to_string(),
        }),
        (binding, location) => {
            warn!(
                element = node.tag_name().name(),
                binding = ?binding,
                location = ?location,
                "Skipping metadata endpoint without Binding or Location"
            );
            None
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MetadataError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MetadataError::Parse(format!("invalid validUntil '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures::{entities_xml, entity_xml, sp_entity_xml};
    use crate::metadata::HTTP_REDIRECT_BINDING;

    #[test]
    fn test_single_entity() {
        let xml = entity_xml("https://idp.example.com/metadata");
        let entity = select_entity(xml.as_bytes()).unwrap();

        assert_eq!(entity.entity_id, "https://idp.example.com/metadata");
        assert!(entity.has_idp_sso_descriptor());
        assert_eq!(
            entity.sso_location(HTTP_REDIRECT_BINDING),
            Some("https://idp.example.com/sso")
        );

        let idp = &entity.idp_sso_descriptors[0];
        assert!(idp.want_authn_requests_signed);
        assert_eq!(idp.signing_certificates, vec!["MIIBszCCAVmgAwIBAgIJAKt".to_string()]);
        assert!(idp.encryption_certificates.is_empty());
        assert_eq!(
            idp.slo_location(HTTP_REDIRECT_BINDING),
            Some("https://idp.example.com/slo")
        );
        assert_eq!(idp.name_id_formats.len(), 1);
        assert!(entity.valid_until.is_some());
        assert!(!entity.is_expired());
    }

    #[test]
    fn test_single_entity_without_idp_role_is_returned() {
        let xml = sp_entity_xml("https://sp.example.com");
        let entity = select_entity(xml.as_bytes()).unwrap();
        assert_eq!(entity.entity_id, "https://sp.example.com");
        assert!(!entity.has_idp_sso_descriptor());
        assert_eq!(entity.sp_sso_descriptor_count, 1);
    }

    #[test]
    fn test_collection_selects_idp_at_any_position() {
        let xml = entities_xml(&[
            sp_entity_xml("https://sp-a.example.com"),
            sp_entity_xml("https://sp-b.example.com"),
            entity_xml("https://idp.example.com/metadata"),
        ]);
        let entity = select_entity(xml.as_bytes()).unwrap();
        assert_eq!(entity.entity_id, "https://idp.example.com/metadata");

        let xml = entities_xml(&[
            entity_xml("https://idp.example.com/metadata"),
            sp_entity_xml("https://sp-a.example.com"),
            sp_entity_xml("https://sp-b.example.com"),
        ]);
        let entity = select_entity(xml.as_bytes()).unwrap();
        assert_eq!(entity.entity_id, "https://idp.example.com/metadata");
    }

    #[test]
    fn test_collection_picks_first_idp() {
        let xml = entities_xml(&[
            sp_entity_xml("https://sp.example.com"),
            entity_xml("https://idp-1.example.com"),
            entity_xml("https://idp-2.example.com"),
        ]);
        let entity = select_entity(xml.as_bytes()).unwrap();
        assert_eq!(entity.entity_id, "https://idp-1.example.com");
    }

    #[test]
    fn test_collection_without_idp() {
        let xml = entities_xml(&[
            sp_entity_xml("https://sp-a.example.com"),
            sp_entity_xml("https://sp-b.example.com"),
            sp_entity_xml("https://sp-c.example.com"),
        ]);
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::NoIdpEntity)
        ));
    }

    #[test]
    fn test_nested_collection_in_document_order() {
        let inner = entities_xml(&[entity_xml("https://nested-idp.example.com")]);
        let xml = entities_xml(&[
            sp_entity_xml("https://sp.example.com"),
            inner,
            entity_xml("https://later-idp.example.com"),
        ]);

        match parse_metadata(xml.as_bytes()).unwrap() {
            MetadataDocument::Entities(entities) => {
                assert_eq!(entities.entity_descriptors.len(), 3);
                assert_eq!(
                    entities.first_idp().map(|e| e.entity_id.as_str()),
                    Some("https://nested-idp.example.com")
                );
            }
            other => panic!("expected collection, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_root() {
        let xml = r#"<Response xmlns="urn:oasis:names:tc:SAML:2.0:protocol"/>"#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::UnexpectedRoot(_))
        ));
    }

    #[test]
    fn test_root_without_metadata_namespace() {
        let xml = r#"<EntityDescriptor entityID="https://idp.example.com"/>"#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::UnexpectedRoot(_))
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata""#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::Parse(_))
        ));
        assert!(matches!(
            select_entity(b"not xml at all"),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_entity_id() {
        let xml = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata"/>"#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_valid_until() {
        let xml = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata"
            entityID="https://idp.example.com" validUntil="next tuesday"/>"#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn test_dtd_rejected() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE lolz [<!ENTITY lol "lol">]>
<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="&lol;"/>"#;
        assert!(matches!(
            select_entity(xml.as_bytes()),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn test_unprefixed_key_descriptor_serves_both_uses() {
        let xml = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata"
                entityID="https://idp.example.com">
            <IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
                <KeyDescriptor>
                    <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
                        <X509Data><X509Certificate>
                            AAAA
                            BBBB
                        </X509Certificate></X509Data>
                    </KeyInfo>
                </KeyDescriptor>
            </IDPSSODescriptor>
        </EntityDescriptor>"#;

        let entity = select_entity(xml.as_bytes()).unwrap();
        let idp = &entity.idp_sso_descriptors[0];
        assert_eq!(idp.signing_certificates, vec!["AAAABBBB".to_string()]);
        assert_eq!(idp.encryption_certificates, vec!["AAAABBBB".to_string()]);
        assert_eq!(entity.signing_certificates().count(), 1);
    }

    #[test]
    fn test_endpoint_without_binding_is_skipped() {
        let xml = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata"
                entityID="https://idp.example.com">
            <IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
                <SingleSignOnService Location="https://idp.example.com/broken"/>
                <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"/>
                <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect"
                    Location="https://idp.example.com/sso"/>
                <SingleLogoutService/>
            </IDPSSODescriptor>
        </EntityDescriptor>"#;

        let entity = select_entity(xml.as_bytes()).unwrap();
        let idp = &entity.idp_sso_descriptors[0];
        assert_eq!(idp.single_sign_on_services.len(), 1);
        assert_eq!(
            entity.sso_location(HTTP_REDIRECT_BINDING),
            Some("https://idp.example.com/sso")
        );
        assert!(idp.single_logout_services.is_empty());
        assert_eq!(entity.sp_sso_descriptor_count, 0);
    }

    #[test]
    fn test_collection_tolerates_broken_endpoint() {
        let broken = r#"<EntityDescriptor entityID="https://broken.example.com">
  <IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <SingleSignOnService Location="https://broken.example.com/sso"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#
            .to_string();
        let xml = entities_xml(&[broken, entity_xml("https://idp.example.com/metadata")]);

        let entity = select_entity(xml.as_bytes()).unwrap();
        assert_eq!(entity.entity_id, "https://broken.example.com");
        assert!(entity.idp_sso_descriptors[0].single_sign_on_services.is_empty());
    }
}
