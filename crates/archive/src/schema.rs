use jsonschema::Validator;
use serde_json::Value;

use atlas_core::CrawlError;

/// Every record stream the archive can carry, in the order datasets appear
/// in the manifest and the coverage matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatasetKind {
    Pages,
    Edges,
    Assets,
    Responses,
    Errors,
    Events,
    Accessibility,
    DomSnapshots,
    Console,
    Styles,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 10] = [
        DatasetKind::Pages,
        DatasetKind::Edges,
        DatasetKind::Assets,
        DatasetKind::Responses,
        DatasetKind::Errors,
        DatasetKind::Events,
        DatasetKind::Accessibility,
        DatasetKind::DomSnapshots,
        DatasetKind::Console,
        DatasetKind::Styles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Pages => "pages",
            DatasetKind::Edges => "edges",
            DatasetKind::Assets => "assets",
            DatasetKind::Responses => "responses",
            DatasetKind::Errors => "errors",
            DatasetKind::Events => "events",
            DatasetKind::Accessibility => "accessibility",
            DatasetKind::DomSnapshots => "dom_snapshots",
            DatasetKind::Console => "console",
            DatasetKind::Styles => "styles",
        }
    }

    pub fn schema_json(&self) -> &'static str {
        match self {
            DatasetKind::Pages => include_str!("../schemas/pages.schema.json"),
            DatasetKind::Edges => include_str!("../schemas/edges.schema.json"),
            DatasetKind::Assets => include_str!("../schemas/assets.schema.json"),
            DatasetKind::Responses => include_str!("../schemas/responses.schema.json"),
            DatasetKind::Errors => include_str!("../schemas/errors.schema.json"),
            DatasetKind::Events => include_str!("../schemas/events.schema.json"),
            DatasetKind::Accessibility => include_str!("../schemas/accessibility.schema.json"),
            DatasetKind::DomSnapshots => include_str!("../schemas/dom_snapshots.schema.json"),
            DatasetKind::Console => include_str!("../schemas/console.schema.json"),
            DatasetKind::Styles => include_str!("../schemas/styles.schema.json"),
        }
    }

    pub fn schema_uri(&self) -> String {
        format!("atlas://schemas/{}.v1.schema.json", self.name())
    }

    /// Relative path of the schema file inside the archive.
    pub fn schema_path(&self) -> String {
        format!("schemas/{}.schema.json", self.name())
    }

    /// Which modes this dataset is collected in. `None` means always.
    pub fn required_mode(&self) -> Option<&'static [&'static str]> {
        match self {
            DatasetKind::Accessibility => Some(&["prerender", "full"]),
            DatasetKind::DomSnapshots | DatasetKind::Console | DatasetKind::Styles => {
                Some(&["full"])
            }
            _ => None,
        }
    }

    pub fn compile_validator(&self) -> Result<Validator, CrawlError> {
        let schema: Value =
            serde_json::from_str(self.schema_json()).map_err(|e| CrawlError::Schema {
                dataset: self.name().to_string(),
                message: format!("schema parse: {e}"),
            })?;
        jsonschema::validator_for(&schema).map_err(|e| CrawlError::Schema {
            dataset: self.name().to_string(),
            message: format!("schema compile: {e}"),
        })
    }

    /// Validate one record, formatting the first violation as path+message.
    pub fn validate(&self, validator: &Validator, record: &Value) -> Result<(), CrawlError> {
        if let Some(error) = validator.iter_errors(record).next() {
            return Err(CrawlError::Schema {
                dataset: self.name().to_string(),
                message: format!("{}: {}", error.instance_path, error),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_schemas_compile() {
        for kind in DatasetKind::ALL {
            kind.compile_validator().unwrap();
        }
    }

    #[test]
    fn edge_record_validates() {
        let kind = DatasetKind::Edges;
        let validator = kind.compile_validator().unwrap();
        let good = json!({
            "sourceUrl": "https://a/",
            "targetUrl": "https://b/",
            "isExternal": true,
            "anchorText": "b",
            "rel": null,
            "nofollow": false,
            "sponsored": false,
            "ugc": false,
            "location": "main",
            "selectorHint": "main > a",
            "discoveredInMode": "raw",
            "linkType": "external"
        });
        kind.validate(&validator, &good).unwrap();

        let bad = json!({ "sourceUrl": "https://a/" });
        let err = kind.validate(&validator, &bad).unwrap_err();
        assert!(matches!(err, CrawlError::Schema { .. }));
    }

    #[test]
    fn page_record_enum_is_closed() {
        let kind = DatasetKind::Pages;
        let validator = kind.compile_validator().unwrap();
        let mut page = json!({
            "pageId": "6cd51cd2-4df0-4bd0-9f0e-aaaaaaaaaaaa",
            "url": "https://h/",
            "finalUrl": "https://h/",
            "normalizedUrl": "https://h/",
            "urlKey": "a".repeat(40),
            "statusCode": 200,
            "renderMode": "raw",
            "depth": 0,
            "rawHtmlHash": "b".repeat(64),
            "navEndReason": "load",
            "redirectChain": [],
            "fetchMs": 10,
            "renderMs": 0,
            "fetchedAt": "2026-01-01T00:00:00Z"
        });
        kind.validate(&validator, &page).unwrap();

        page["renderMode"] = json!("headful");
        assert!(kind.validate(&validator, &page).is_err());
    }

    #[test]
    fn mode_requirements() {
        assert!(DatasetKind::Pages.required_mode().is_none());
        assert_eq!(
            DatasetKind::Console.required_mode(),
            Some(["full"].as_slice())
        );
    }
}
