//! Coverage serialization and merge
//!
//! The database exports as a tree of items with per-bin hit counts, as XML
//! or YAML. A previously exported file can be merged back: hit counts add
//! element-wise, everything else must match. The XML schema is written and
//! read by a small reader/writer dedicated to it.

use crate::check::CheckState;
use crate::db::CoverageDb;
use crate::error::{CoverageError, Result};
use crate::item::{CoverItem, ItemKind};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSnapshot {
    pub label: String,
    pub value: String,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub name: String,
    pub size: u64,
    pub coverage: u64,
    pub cover_percentage: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bins: Vec<BinSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub coverage: Vec<ItemSnapshot>,
}

/// Leaf bins as (label, value, hits), in declaration order.
fn leaf_bins(item: &CoverItem) -> Vec<BinSnapshot> {
    match &item.kind {
        ItemKind::Group => Vec::new(),
        ItemKind::Point(state) => state
            .bins
            .iter()
            .map(|(bin, bs)| BinSnapshot {
                label: bs.label.clone().unwrap_or_else(|| bin.to_string()),
                value: bin.to_string(),
                hits: bs.hits,
            })
            .collect(),
        ItemKind::Cross(state) => state
            .bins
            .iter()
            .map(|(bin, hits)| BinSnapshot {
                label: bin.to_string(),
                value: bin.to_string(),
                hits: *hits,
            })
            .collect(),
        ItemKind::Check(state) => vec![
            BinSnapshot {
                label: "PASS".into(),
                value: "PASS".into(),
                hits: state.pass_hits,
            },
            BinSnapshot {
                label: "FAIL".into(),
                value: "FAIL".into(),
                hits: state.fail_hits,
            },
        ],
    }
}

impl CoverageDb {
    /// Snapshot of the whole tree; items in name order, bins in
    /// declaration order.
    pub fn snapshot(&self) -> CoverageSnapshot {
        let mut roots: Vec<&CoverItem> = self
            .items
            .values()
            .filter(|i| i.parent.is_none())
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        CoverageSnapshot {
            coverage: roots.iter().map(|r| self.snapshot_item(r)).collect(),
        }
    }

    fn snapshot_item(&self, item: &CoverItem) -> ItemSnapshot {
        let mut children: Vec<&CoverItem> = item
            .children
            .iter()
            .filter_map(|c| self.items.get(c.as_str()))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        ItemSnapshot {
            name: item.name.clone(),
            size: item.size,
            coverage: item.coverage,
            cover_percentage: item.cover_percentage(),
            bins: leaf_bins(item),
            items: children.iter().map(|c| self.snapshot_item(c)).collect(),
        }
    }

    pub fn export_xml(&self, out: &mut dyn Write) -> Result<()> {
        let snapshot = self.snapshot();
        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(out, "<coverage>")?;
        for item in &snapshot.coverage {
            write_item_xml(out, item, 1)?;
        }
        writeln!(out, "</coverage>")?;
        Ok(())
    }

    pub fn export_yaml(&self, out: &mut dyn Write) -> Result<()> {
        serde_yaml::to_writer(out, &self.snapshot())?;
        Ok(())
    }

    /// Export in the format implied by the path extension
    /// (`.xml`, `.yml`/`.yaml`).
    pub fn export_to_path(&self, path: &Path) -> Result<()> {
        let format = extension_of(path)?;
        let mut file = std::fs::File::create(path)?;
        match format {
            FileFormat::Xml => self.export_xml(&mut file),
            FileFormat::Yaml => self.export_yaml(&mut file),
        }
    }

    /// Parse a previously exported file and add its hit counts into the
    /// registered items. Structure must match exactly; on any mismatch an
    /// error names the first offending path and the database is unchanged.
    pub fn import_and_merge(&mut self, path: &Path) -> Result<()> {
        let format = extension_of(path)?;
        let text = std::fs::read_to_string(path)?;
        let snapshot = match format {
            FileFormat::Xml => parse_xml(&text)?,
            FileFormat::Yaml => serde_yaml::from_str::<CoverageSnapshot>(&text)?,
        };

        // validate everything before touching any counter
        for item in &snapshot.coverage {
            self.validate_merge(item)?;
        }
        for item in &snapshot.coverage {
            self.apply_merge(item);
        }
        self.recompute_aggregates();
        Ok(())
    }

    fn validate_merge(&self, snap: &ItemSnapshot) -> Result<()> {
        let mismatch = |reason: &str| CoverageError::MergeMismatch {
            path: snap.name.clone(),
            reason: reason.to_string(),
        };
        let item = self
            .items
            .get(&snap.name)
            .ok_or_else(|| mismatch("unknown item"))?;
        if item.size != snap.size {
            return Err(mismatch(&format!(
                "size {} does not match registered size {}",
                snap.size, item.size
            )));
        }

        if item.is_leaf() {
            if !snap.items.is_empty() {
                return Err(mismatch("leaf in database, group in file"));
            }
            let bins = leaf_bins(item);
            if bins.len() != snap.bins.len() {
                return Err(mismatch(&format!(
                    "{} bins in file, {} registered",
                    snap.bins.len(),
                    bins.len()
                )));
            }
            for (registered, incoming) in bins.iter().zip(&snap.bins) {
                if registered.label != incoming.label || registered.value != incoming.value {
                    return Err(CoverageError::MergeMismatch {
                        path: format!("{}/{}", snap.name, incoming.label),
                        reason: format!(
                            "bin {:?}={:?} does not match registered {:?}={:?}",
                            incoming.label, incoming.value, registered.label, registered.value
                        ),
                    });
                }
            }
            return Ok(());
        }

        if !snap.bins.is_empty() {
            return Err(mismatch("group in database, leaf in file"));
        }
        let mut registered: Vec<&str> = item.children.iter().map(|c| c.as_str()).collect();
        registered.sort_unstable();
        let mut incoming: Vec<&str> = snap.items.iter().map(|c| c.name.as_str()).collect();
        incoming.sort_unstable();
        if registered != incoming {
            return Err(mismatch("child items differ"));
        }
        for child in &snap.items {
            self.validate_merge(child)?;
        }
        Ok(())
    }

    fn apply_merge(&mut self, snap: &ItemSnapshot) {
        if let Some(item) = self.items.get_mut(&snap.name) {
            match &mut item.kind {
                ItemKind::Group => {}
                ItemKind::Point(state) => {
                    for (bs, incoming) in state.bins.values_mut().zip(&snap.bins) {
                        bs.hits += incoming.hits;
                    }
                }
                ItemKind::Cross(state) => {
                    for (hits, incoming) in state.bins.values_mut().zip(&snap.bins) {
                        *hits += incoming.hits;
                    }
                }
                ItemKind::Check(state) => merge_check(state, snap),
            }
        }
        for child in &snap.items {
            self.apply_merge(child);
        }
    }
}

fn merge_check(state: &mut CheckState, snap: &ItemSnapshot) {
    for incoming in &snap.bins {
        match incoming.label.as_str() {
            "PASS" => state.pass_hits += incoming.hits,
            "FAIL" => state.fail_hits += incoming.hits,
            _ => {}
        }
    }
}

enum FileFormat {
    Xml,
    Yaml,
}

fn extension_of(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => Ok(FileFormat::Xml),
        Some("yml") | Some("yaml") => Ok(FileFormat::Yaml),
        other => Err(CoverageError::Format(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn write_item_xml(out: &mut dyn Write, item: &ItemSnapshot, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    write!(
        out,
        r#"{}<item name="{}" size="{}" coverage="{}" cover_percentage="{}""#,
        indent,
        escape(&item.name),
        item.size,
        item.coverage,
        item.cover_percentage
    )?;
    if item.bins.is_empty() && item.items.is_empty() {
        writeln!(out, "/>")?;
        return Ok(());
    }
    writeln!(out, ">")?;
    for bin in &item.bins {
        writeln!(
            out,
            r#"{}  <bin label="{}" value="{}" hits="{}"/>"#,
            indent,
            escape(&bin.label),
            escape(&bin.value),
            bin.hits
        )?;
    }
    for child in &item.items {
        write_item_xml(out, child, depth + 1)?;
    }
    writeln!(out, "{indent}</item>")?;
    Ok(())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct XmlTag {
    name: String,
    attrs: Vec<(String, String)>,
    closing: bool,
    self_closing: bool,
}

impl XmlTag {
    fn attr(&self, key: &str) -> Result<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| CoverageError::Xml(format!("<{}> missing attribute {key}", self.name)))
    }

    fn attr_u64(&self, key: &str) -> Result<u64> {
        self.attr(key)?
            .parse()
            .map_err(|_| CoverageError::Xml(format!("<{}> bad {key} attribute", self.name)))
    }

    fn attr_f64(&self, key: &str) -> Result<f64> {
        self.attr(key)?
            .parse()
            .map_err(|_| CoverageError::Xml(format!("<{}> bad {key} attribute", self.name)))
    }
}

fn parse_tags(text: &str) -> Result<Vec<XmlTag>> {
    let mut tags = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let end = after
            .find('>')
            .ok_or_else(|| CoverageError::Xml("unterminated tag".into()))?;
        let body = &after[..end];
        rest = &after[end + 1..];
        if body.starts_with('?') || body.starts_with('!') {
            continue;
        }
        tags.push(parse_tag(body)?);
    }
    Ok(tags)
}

fn parse_tag(body: &str) -> Result<XmlTag> {
    let closing = body.starts_with('/');
    let body = body.strip_prefix('/').unwrap_or(body);
    let self_closing = body.ends_with('/');
    let body = body.strip_suffix('/').unwrap_or(body).trim();

    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());
    let name = body[..name_end].to_string();
    if name.is_empty() {
        return Err(CoverageError::Xml("empty tag name".into()));
    }

    let mut attrs = Vec::new();
    let mut rest = body[name_end..].trim_start();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| CoverageError::Xml(format!("<{name}> malformed attribute")))?;
        let key = rest[..eq].trim().to_string();
        let after_eq = rest[eq + 1..].trim_start();
        let inner = after_eq
            .strip_prefix('"')
            .ok_or_else(|| CoverageError::Xml(format!("<{name}> attribute {key} not quoted")))?;
        let close = inner
            .find('"')
            .ok_or_else(|| CoverageError::Xml(format!("<{name}> attribute {key} unterminated")))?;
        attrs.push((key, unescape(&inner[..close])));
        rest = inner[close + 1..].trim_start();
    }
    Ok(XmlTag {
        name,
        attrs,
        closing,
        self_closing,
    })
}

fn parse_xml(text: &str) -> Result<CoverageSnapshot> {
    let tags = parse_tags(text)?;
    let mut iter = tags.into_iter();

    match iter.next() {
        Some(tag) if tag.name == "coverage" && !tag.closing => {}
        _ => return Err(CoverageError::Xml("expected <coverage> root".into())),
    }

    let mut roots: Vec<ItemSnapshot> = Vec::new();
    // partially parsed <item> elements, innermost last
    let mut stack: Vec<ItemSnapshot> = Vec::new();

    for tag in iter {
        match (tag.name.as_str(), tag.closing) {
            ("item", false) => {
                let item = ItemSnapshot {
                    name: tag.attr("name")?.to_string(),
                    size: tag.attr_u64("size")?,
                    coverage: tag.attr_u64("coverage")?,
                    cover_percentage: tag.attr_f64("cover_percentage")?,
                    bins: Vec::new(),
                    items: Vec::new(),
                };
                if tag.self_closing {
                    match stack.last_mut() {
                        Some(parent) => parent.items.push(item),
                        None => roots.push(item),
                    }
                } else {
                    stack.push(item);
                }
            }
            ("item", true) => {
                let item = stack
                    .pop()
                    .ok_or_else(|| CoverageError::Xml("unmatched </item>".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.items.push(item),
                    None => roots.push(item),
                }
            }
            ("bin", false) => {
                let bin = BinSnapshot {
                    label: tag.attr("label")?.to_string(),
                    value: tag.attr("value")?.to_string(),
                    hits: tag.attr_u64("hits")?,
                };
                stack
                    .last_mut()
                    .ok_or_else(|| CoverageError::Xml("<bin> outside <item>".into()))?
                    .bins
                    .push(bin);
            }
            ("coverage", true) => {
                if !stack.is_empty() {
                    return Err(CoverageError::Xml("unclosed <item>".into()));
                }
                return Ok(CoverageSnapshot { coverage: roots });
            }
            (other, _) => {
                return Err(CoverageError::Xml(format!("unexpected tag <{other}>")));
            }
        }
    }
    Err(CoverageError::Xml("missing </coverage>".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::CoverPointBuilder;
    use crate::sampler::Sampler;
    use crate::value::SampleArgs;

    fn populate(prefix: &str) -> Sampler {
        CoverPointBuilder::new(format!("{prefix}.a"))
            .bins(0..3)
            .vname("x")
            .register()
            .unwrap();
        CoverPointBuilder::new(format!("{prefix}.b"))
            .bins(["lo", "hi"])
            .vname("m")
            .register()
            .unwrap();
        Sampler::new([format!("{prefix}.a"), format!("{prefix}.b")]).unwrap()
    }

    #[test]
    fn test_snapshot_shape() {
        CoverageDb::reset();
        let sampler = populate("e1");
        sampler
            .sample(&SampleArgs::new().arg("x", 1).arg("m", "lo"))
            .unwrap();

        let snapshot = CoverageDb::with(|db| db.snapshot());
        assert_eq!(snapshot.coverage.len(), 1);
        let root = &snapshot.coverage[0];
        assert_eq!(root.name, "e1");
        assert_eq!(root.size, 5);
        assert_eq!(root.coverage, 2);
        assert_eq!(root.items.len(), 2);
        assert_eq!(root.items[0].bins.len(), 3);
        assert_eq!(root.items[0].bins[1].hits, 1);
    }

    #[test]
    fn test_xml_round_trip() {
        CoverageDb::reset();
        let sampler = populate("e2");
        sampler
            .sample(&SampleArgs::new().arg("x", 2).arg("m", "hi"))
            .unwrap();

        let mut buf = Vec::new();
        let snapshot = CoverageDb::with(|db| {
            db.export_xml(&mut buf).unwrap();
            db.snapshot()
        });
        let parsed = parse_xml(std::str::from_utf8(&buf).unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_yaml_round_trip() {
        CoverageDb::reset();
        let sampler = populate("e3");
        sampler
            .sample(&SampleArgs::new().arg("x", 0).arg("m", "lo"))
            .unwrap();

        let mut buf = Vec::new();
        let snapshot = CoverageDb::with(|db| {
            db.export_yaml(&mut buf).unwrap();
            db.snapshot()
        });
        let parsed: CoverageSnapshot =
            serde_yaml::from_str(std::str::from_utf8(&buf).unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_merge_adds_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.xml");

        CoverageDb::reset();
        let sampler = populate("e4");
        sampler
            .sample(&SampleArgs::new().arg("x", 1).arg("m", "lo"))
            .unwrap();
        CoverageDb::with(|db| db.export_to_path(&path)).unwrap();

        sampler
            .sample(&SampleArgs::new().arg("x", 2).arg("m", "hi"))
            .unwrap();
        CoverageDb::with(|db| db.import_and_merge(&path)).unwrap();

        CoverageDb::with(|db| {
            let bins = db.get("e4.a").unwrap().detailed_coverage();
            let hits: Vec<u64> = bins.values().copied().collect();
            // x=1 counted twice (live + merged), x=2 once
            assert_eq!(hits, vec![0, 2, 1]);
            assert_eq!(db.get("e4").unwrap().coverage(), 4);
        });
    }

    #[test]
    fn test_merge_rejects_foreign_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.xml");

        CoverageDb::reset();
        let _ = populate("e5");
        CoverageDb::with(|db| db.export_to_path(&path)).unwrap();

        CoverageDb::reset();
        CoverPointBuilder::new("e5.a")
            .bins(0..3)
            .vname("x")
            .register()
            .unwrap();
        // e5.b missing: structures differ
        let err = CoverageDb::with(|db| db.import_and_merge(&path));
        assert!(matches!(err, Err(CoverageError::MergeMismatch { .. })));
        // nothing was applied
        CoverageDb::with(|db| {
            assert_eq!(db.get("e5.a").unwrap().detailed_coverage().values().sum::<u64>(), 0);
        });
    }

    #[test]
    fn test_unknown_extension_rejected() {
        CoverageDb::reset();
        let err = CoverageDb::with(|db| db.import_and_merge(Path::new("cov.json")));
        assert!(matches!(err, Err(CoverageError::Format(_))));
    }

    #[test]
    fn test_escape_round_trip() {
        let text = r#"a<b>&"quoted"&'x'"#;
        assert_eq!(unescape(&escape(text)), text);
    }
}
