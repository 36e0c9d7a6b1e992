//! xLights project / sequence XML
//!
//! Accepted roots are `<xsequence>` (sequence files) and `<xrgb>` (layout
//! projects). Header fields come from root attributes first and `<head>`
//! children second. `model` and `effect` elements are counted at any depth.
//!
//! Two extractors implement [`ProjectExtractor`]: a streaming quick-xml
//! reader, and a regex pass that tolerates malformed markup. [`extract`] tries
//! them in that order.

use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::MetadataError;

/// Root element names accepted as project files
pub const ACCEPTED_ROOTS: [&str; 2] = ["xsequence", "xrgb"];

/// Which extractor produced a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Structured,
    Pattern,
}

/// Summary of a project file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub root: String,
    pub version: Option<String>,
    pub media_file: Option<String>,
    pub sequence_type: Option<String>,
    pub sequence_timing: Option<String>,
    pub sequence_duration: Option<String>,
    pub model_count: u32,
    pub effect_count: u32,
    pub method: Option<ExtractionMethod>,
}

/// One way of reading a project summary out of XML text
pub trait ProjectExtractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    fn extract(&self, xml: &str) -> Result<ProjectSummary, MetadataError>;
}

/// Extract with the preferred extractor, falling back when it fails
pub fn extract(xml: &str) -> Result<ProjectSummary, MetadataError> {
    extract_with(&[&StructuredExtractor, &PatternExtractor], xml)
}

/// Try each extractor in order and return the first success
pub fn extract_with(extractors: &[&dyn ProjectExtractor], xml: &str) -> Result<ProjectSummary, MetadataError> {
    let mut last_error = MetadataError::Xml("no extractor available".to_string());

    for extractor in extractors {
        match extractor.extract(xml) {
            Ok(mut summary) => {
                summary.method = Some(extractor.method());
                return Ok(summary);
            }
            Err(e) => {
                tracing::debug!(
                    method = ?extractor.method(),
                    error = %e,
                    "Project extractor failed, trying next"
                );
                last_error = e;
            }
        }
    }

    Err(last_error)
}

// ============================================================================
// Header fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Version,
    MediaFile,
    SequenceType,
    SequenceTiming,
    SequenceDuration,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Version,
        Field::MediaFile,
        Field::SequenceType,
        Field::SequenceTiming,
        Field::SequenceDuration,
    ];

    fn name(&self) -> &'static str {
        match self {
            Field::Version => "version",
            Field::MediaFile => "mediaFile",
            Field::SequenceType => "sequenceType",
            Field::SequenceTiming => "sequenceTiming",
            Field::SequenceDuration => "sequenceDuration",
        }
    }

    fn from_name(name: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl ProjectSummary {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Version => &mut self.version,
            Field::MediaFile => &mut self.media_file,
            Field::SequenceType => &mut self.sequence_type,
            Field::SequenceTiming => &mut self.sequence_timing,
            Field::SequenceDuration => &mut self.sequence_duration,
        }
    }

    /// Set a field unless it already has a value
    fn fill(&mut self, field: Field, value: &str) {
        let value = value.trim();
        let slot = self.slot(field);
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }

    fn count(&mut self, element: &str) {
        if element.eq_ignore_ascii_case("model") {
            self.model_count += 1;
        } else if element.eq_ignore_ascii_case("effect") {
            self.effect_count += 1;
        }
    }
}

fn accepted_root(name: &str) -> bool {
    ACCEPTED_ROOTS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

// ============================================================================
// Structured extractor
// ============================================================================

/// Streaming quick-xml reader
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredExtractor;

impl StructuredExtractor {
    fn read_attributes(summary: &mut ProjectSummary, element: &BytesStart<'_>) -> Result<(), MetadataError> {
        for attr in element.attributes() {
            let attr = attr.map_err(|e| MetadataError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            if let Some(field) = Field::from_name(&key) {
                let value = attr
                    .unescape_value()
                    .map_err(|e| MetadataError::Xml(e.to_string()))?;
                summary.fill(field, &value);
            }
        }
        Ok(())
    }
}

impl ProjectExtractor for StructuredExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Structured
    }

    fn extract(&self, xml: &str) -> Result<ProjectSummary, MetadataError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut summary = ProjectSummary::default();
        let mut root_seen = false;
        let mut depth = 0usize;
        // field whose text we are waiting for, with the depth it was opened at
        let mut pending: Option<(Field, usize)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    depth += 1;

                    if !root_seen {
                        if !accepted_root(&name) {
                            return Err(MetadataError::UnrecognizedRoot(name));
                        }
                        root_seen = true;
                        summary.root = name;
                        Self::read_attributes(&mut summary, &e)?;
                        continue;
                    }

                    summary.count(&name);
                    pending = Field::from_name(&name).map(|f| (f, depth));
                }
                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                    if !root_seen {
                        if !accepted_root(&name) {
                            return Err(MetadataError::UnrecognizedRoot(name));
                        }
                        summary.root = name;
                        Self::read_attributes(&mut summary, &e)?;
                        return Ok(summary);
                    }

                    summary.count(&name);
                }
                Ok(Event::Text(t)) => {
                    if let Some((field, at)) = pending {
                        if at == depth {
                            let text = t.unescape().map_err(|e| MetadataError::Xml(e.to_string()))?;
                            summary.fill(field, &text);
                        }
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some((field, at)) = pending {
                        if at == depth {
                            summary.fill(field, &String::from_utf8_lossy(&t.into_inner()));
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    pending = None;
                    depth = depth.saturating_sub(1);
                    if root_seen && depth == 0 {
                        return Ok(summary);
                    }
                }
                Ok(Event::Eof) => {
                    return if root_seen {
                        Err(MetadataError::Xml("unexpected end of document".to_string()))
                    } else {
                        Err(MetadataError::Xml("document has no root element".to_string()))
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(MetadataError::Xml(format!(
                        "at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }
    }
}

// ============================================================================
// Pattern extractor
// ============================================================================

lazy_static! {
    static ref ROOT_RE: Regex = Regex::new(r"(?i)<(xsequence|xrgb)\b([^>]*)>").unwrap();
    static ref ATTR_RE: Regex = Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    static ref ELEMENT_RE: Regex =
        Regex::new(r"(?i)<(version|mediaFile|sequenceType|sequenceTiming|sequenceDuration)\s*>([^<]*)<").unwrap();
    static ref MODEL_RE: Regex = Regex::new(r"(?i)<model\b").unwrap();
    static ref EFFECT_RE: Regex = Regex::new(r"(?i)<effect\b").unwrap();
}

/// Best-effort regex extraction over raw text
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl ProjectExtractor for PatternExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pattern
    }

    fn extract(&self, xml: &str) -> Result<ProjectSummary, MetadataError> {
        let root = ROOT_RE
            .captures(xml)
            .ok_or_else(|| MetadataError::UnrecognizedRoot("no xsequence or xrgb element found".to_string()))?;

        let mut summary = ProjectSummary {
            root: root[1].to_string(),
            ..Default::default()
        };

        let attributes = root.get(2).map(|m| m.as_str()).unwrap_or_default();
        for cap in ATTR_RE.captures_iter(attributes) {
            let key = cap[1].rsplit(':').next().unwrap_or_default();
            let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str()).unwrap_or_default();
            if let Some(field) = Field::from_name(key) {
                summary.fill(field, &unescape_entities(value));
            }
        }

        for cap in ELEMENT_RE.captures_iter(xml) {
            if let Some(field) = Field::from_name(&cap[1]) {
                summary.fill(field, &unescape_entities(&cap[2]));
            }
        }

        summary.model_count = MODEL_RE.find_iter(xml).count() as u32;
        summary.effect_count = EFFECT_RE.find_iter(xml).count() as u32;

        Ok(summary)
    }
}

fn unescape_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SEQUENCE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsequence BaseChannel="0" ChanCtrlBasic="0" FixedPointTiming="1" ModelBlending="true">
  <head>
    <version>2024.05</version>
    <author>Holiday Lights</author>
    <song>Carol of the Bells</song>
    <mediaFile>C:\Shows\Carol &amp; Bells.mp3</mediaFile>
    <sequenceType>Media</sequenceType>
    <sequenceTiming>50 ms</sequenceTiming>
    <sequenceDuration>182.500</sequenceDuration>
  </head>
  <ElementEffects>
    <Element type="model" name="MegaTree">
      <EffectLayer>
        <Effect ref="0" name="Bars" startTime="0" endTime="1000"/>
        <Effect ref="1" name="Butterfly" startTime="1000" endTime="2000"/>
      </EffectLayer>
    </Element>
    <Element type="model" name="Arches">
      <EffectLayer>
        <Effect ref="2" name="On" startTime="0" endTime="500"/>
      </EffectLayer>
    </Element>
  </ElementEffects>
  <models>
    <model name="MegaTree"/>
    <model name="Arches"><model name="Arch1"/></model>
  </models>
</xsequence>
"#;

    #[test]
    fn test_structured_reads_head_and_counts() {
        let summary = StructuredExtractor.extract(SEQUENCE_XML).unwrap();

        assert_eq!(summary.root, "xsequence");
        assert_eq!(summary.version.as_deref(), Some("2024.05"));
        assert_eq!(summary.media_file.as_deref(), Some(r"C:\Shows\Carol & Bells.mp3"));
        assert_eq!(summary.sequence_type.as_deref(), Some("Media"));
        assert_eq!(summary.sequence_timing.as_deref(), Some("50 ms"));
        assert_eq!(summary.sequence_duration.as_deref(), Some("182.500"));
        assert_eq!(summary.effect_count, 3);
        assert_eq!(summary.model_count, 3);
    }

    #[test]
    fn test_root_attributes_take_precedence() {
        let xml = r#"<xrgb version="2023.10" sequenceType="Animation"><head><version>1.0</version></head><models><model name="A"/></models></xrgb>"#;
        let summary = StructuredExtractor.extract(xml).unwrap();

        assert_eq!(summary.root, "xrgb");
        assert_eq!(summary.version.as_deref(), Some("2023.10"));
        assert_eq!(summary.sequence_type.as_deref(), Some("Animation"));
        assert_eq!(summary.model_count, 1);
    }

    #[test]
    fn test_unrecognized_root() {
        let err = StructuredExtractor.extract("<playlist><item/></playlist>").unwrap_err();
        assert!(matches!(err, MetadataError::UnrecognizedRoot(ref r) if r == "playlist"));
    }

    #[test]
    fn test_pattern_matches_structured_on_valid_input() {
        let structured = StructuredExtractor.extract(SEQUENCE_XML).unwrap();
        let pattern = PatternExtractor.extract(SEQUENCE_XML).unwrap();

        assert_eq!(pattern.root, structured.root);
        assert_eq!(pattern.version, structured.version);
        assert_eq!(pattern.media_file, structured.media_file);
        assert_eq!(pattern.sequence_type, structured.sequence_type);
        assert_eq!(pattern.sequence_timing, structured.sequence_timing);
        assert_eq!(pattern.model_count, structured.model_count);
        assert_eq!(pattern.effect_count, structured.effect_count);
    }

    #[test]
    fn test_falls_back_on_malformed_xml() {
        // mismatched closing tag breaks the structured reader
        let xml = r#"<?xml version="1.0"?>
<xsequence version="2022.1" mediaFile="song.mp3">
  <models><model name="A"></models>
  <Effect name="On"/><Effect name="Off"/>
</xsequence>"#;

        assert!(StructuredExtractor.extract(xml).is_err());

        let summary = extract(xml).unwrap();
        assert_eq!(summary.method, Some(ExtractionMethod::Pattern));
        assert_eq!(summary.version.as_deref(), Some("2022.1"));
        assert_eq!(summary.media_file.as_deref(), Some("song.mp3"));
        assert_eq!(summary.model_count, 1);
        assert_eq!(summary.effect_count, 2);
    }

    #[test]
    fn test_prefers_structured() {
        let summary = extract(SEQUENCE_XML).unwrap();
        assert_eq!(summary.method, Some(ExtractionMethod::Structured));
    }

    #[test]
    fn test_both_fail_on_foreign_document() {
        assert!(extract("<html><body>nope</body></html>").is_err());
        assert!(extract("not xml at all").is_err());
    }

    #[test]
    fn test_plural_and_compound_names_not_counted() {
        let xml = r#"<xsequence><models><modelGroup name="g"/></models><effects/></xsequence>"#;
        let summary = StructuredExtractor.extract(xml).unwrap();
        assert_eq!(summary.model_count, 0);
        assert_eq!(summary.effect_count, 0);

        let summary = PatternExtractor.extract(xml).unwrap();
        assert_eq!(summary.model_count, 0);
        assert_eq!(summary.effect_count, 0);
    }
}
