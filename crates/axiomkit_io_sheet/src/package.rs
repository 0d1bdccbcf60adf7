//! Zip package part lookup shared by streaming reads and template loading.

use std::collections::HashMap;
use std::io::{Read, Seek};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;

use crate::error::{Result, SheetError};

pub(crate) const C_PART_WORKBOOK: &str = "xl/workbook.xml";
pub(crate) const C_PART_WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
pub(crate) const C_PART_SHARED_STRINGS: &str = "xl/sharedStrings.xml";
pub(crate) const C_PART_STYLES: &str = "xl/styles.xml";
pub(crate) const C_REL_TYPE_SHARED_STRINGS_SUFFIX: &str = "/sharedStrings";
pub(crate) const C_REL_TYPE_STYLES_SUFFIX: &str = "/styles";

/// Relationship id to `(type, target)`.
pub(crate) type DictRelationships = HashMap<String, (String, String)>;

pub(crate) fn read_zip_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut file = archive.by_name(name)?;
    let mut v_bytes = Vec::new();
    file.read_to_end(&mut v_bytes)?;
    Ok(v_bytes)
}

pub(crate) fn read_zip_part_optional<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut v_bytes = Vec::new();
            file.read_to_end(&mut v_bytes)?;
            Ok(Some(v_bytes))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn read_attribute(e: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local_name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Relationship ids of `<sheet>` entries, in workbook order.
pub(crate) fn parse_workbook_sheet_rids(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut l_rids = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let c_rid = read_attribute(&e, b"id")?
                    .ok_or_else(|| SheetError::codec("workbook sheet entry without r:id"))?;
                l_rids.push(c_rid);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(l_rids)
}

pub(crate) fn parse_relationships(xml: &[u8]) -> Result<DictRelationships> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut dict_rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let c_id = read_attribute(&e, b"Id")?.unwrap_or_default();
                let c_type = read_attribute(&e, b"Type")?.unwrap_or_default();
                let c_target = read_attribute(&e, b"Target")?.unwrap_or_default();
                dict_rels.insert(c_id, (c_type, c_target));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(dict_rels)
}

/// Resolve a relationship target of `xl/workbook.xml` to a package part name.
pub(crate) fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(c_absolute) => c_absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

/// Part name of the first relationship whose type ends with `type_suffix`.
pub(crate) fn resolve_part_by_type(
    dict_rels: &DictRelationships,
    type_suffix: &str,
    default_part: &str,
) -> String {
    dict_rels
        .values()
        .find(|(c_type, _)| c_type.ends_with(type_suffix))
        .map(|(_, c_target)| resolve_target(c_target))
        .unwrap_or_else(|| default_part.to_string())
}

/// Worksheet part of the `n_idx_sheet`-th sheet plus the workbook relationships.
pub(crate) fn resolve_sheet_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    n_idx_sheet: usize,
) -> Result<(String, DictRelationships)> {
    let l_rids = parse_workbook_sheet_rids(&read_zip_part(archive, C_PART_WORKBOOK)?)?;
    let dict_rels = parse_relationships(&read_zip_part(archive, C_PART_WORKBOOK_RELS)?)?;
    let c_rid = l_rids.get(n_idx_sheet).ok_or_else(|| {
        SheetError::codec(format!(
            "sheet index {n_idx_sheet} out of range ({} sheet(s))",
            l_rids.len()
        ))
    })?;
    let c_part_sheet = dict_rels
        .get(c_rid)
        .map(|(_, c_target)| resolve_target(c_target))
        .ok_or_else(|| SheetError::codec(format!("no relationship for sheet {c_rid:?}")))?;
    Ok((c_part_sheet, dict_rels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_resolve_relative_to_the_workbook_part() {
        assert_eq!(resolve_target("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("/xl/styles.xml"), "xl/styles.xml");
    }

    #[test]
    fn relationships_are_looked_up_by_type_suffix() {
        let dict_rels = parse_relationships(
            br#"<Relationships><Relationship Id="rId9" Type="http://x/relationships/styles" Target="theme/styles2.xml"/></Relationships>"#,
        )
        .expect("rels");
        assert_eq!(
            resolve_part_by_type(&dict_rels, C_REL_TYPE_STYLES_SUFFIX, C_PART_STYLES),
            "xl/theme/styles2.xml"
        );
        assert_eq!(
            resolve_part_by_type(&dict_rels, C_REL_TYPE_SHARED_STRINGS_SUFFIX, C_PART_SHARED_STRINGS),
            C_PART_SHARED_STRINGS
        );
    }
}
