use crate::error::{GraphError, Result};
use crate::types::{
    Entity, EntityKind, Location, ParseOutcome, Relationship, RelationshipKind,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;

/// Reads a Cobertura XML report and links covered modules to a
/// `coverage_report` entity via `covers` / `executed_by` edges.
pub struct CoverageIngestor;

impl CoverageIngestor {
    /// Parse `coverage.xml`. A missing or malformed report is a non-fatal
    /// outcome carrying the error, matching per-file parse semantics.
    pub async fn process_cobertura(report_path: &Path) -> ParseOutcome {
        let file_path = report_path.display().to_string();
        let xml = match tokio::fs::read_to_string(report_path).await {
            Ok(xml) => xml,
            Err(e) => {
                return ParseOutcome {
                    file_path: file_path.clone(),
                    errors: vec![format!("coverage report unreadable: {e}")],
                    ..Default::default()
                }
            }
        };

        match parse_report(&file_path, &xml) {
            Ok(outcome) => outcome,
            Err(e) => ParseOutcome {
                file_path,
                errors: vec![e.to_string()],
                ..Default::default()
            },
        }
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

fn parse_report(report_path: &str, xml: &str) -> Result<ParseOutcome> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let report_name = Path::new(report_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("coverage.xml")
        .to_string();
    let report_id = format!("coverage::{report_name}");

    let mut outcome = ParseOutcome::new(report_path);
    let mut report_entity = Entity::new(
        EntityKind::CoverageReport,
        report_name.clone(),
        report_name.clone(),
        Location::new(report_path, 1, 1),
    );
    report_entity.id = report_id.clone();

    let mut saw_root = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.name().as_ref() {
                    b"coverage" => {
                        saw_root = true;
                        if let Some(rate) = attr_value(&e, "line-rate") {
                            report_entity.attrs.insert("line-rate".into(), rate.into());
                        }
                        if let Some(ts) = attr_value(&e, "timestamp") {
                            report_entity.attrs.insert("timestamp".into(), ts.into());
                        }
                    }
                    b"class" => {
                        let Some(filename) = attr_value(&e, "filename") else {
                            continue;
                        };
                        let stem = Path::new(&filename)
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or(&filename)
                            .to_string();
                        let module_id = format!("{filename}::{stem}");
                        let line_rate = attr_value(&e, "line-rate").unwrap_or_default();

                        outcome.relationships.push(
                            Relationship::new(
                                report_id.clone(),
                                module_id.clone(),
                                RelationshipKind::Covers,
                            )
                            .with_attr("line-rate", line_rate),
                        );
                        outcome.relationships.push(Relationship::new(
                            module_id,
                            report_id.clone(),
                            RelationshipKind::ExecutedBy,
                        ));
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GraphError::CoverageError(format!(
                    "invalid coverage XML: {e}"
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(GraphError::CoverageError(
            "not a Cobertura report: missing <coverage> root".to_string(),
        ));
    }

    outcome.entities.push(report_entity);
    Ok(outcome)
}
