//! GPX rendering.

use std::fmt::{self, Write};

use quick_xml::escape::escape;

use super::{format_time, GpxDocument, GpxPoint, GPX_CREATOR, GPX_NAMESPACE};

/// Render a document as GPX 1.1 XML.
///
/// Free text is escaped, so names such as `A & B <test>` stay well-formed.
#[must_use]
pub fn write_gpx(doc: &GpxDocument) -> String {
    let mut xml = String::with_capacity(256 + 160 * (doc.track_points.len() + doc.waypoints.len()));
    // Writing into a String cannot fail.
    let _ = write_document(&mut xml, doc);
    xml
}

fn write_document(out: &mut String, doc: &GpxDocument) -> fmt::Result {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<gpx version="1.1" creator="{GPX_CREATOR}" xmlns="{GPX_NAMESPACE}">"#
    )?;

    writeln!(out, "  <metadata>")?;
    write_text(out, "    ", "name", doc.name.as_deref())?;
    write_text(out, "    ", "desc", doc.description.as_deref())?;
    if let Some(time) = &doc.time {
        writeln!(out, "    <time>{}</time>", format_time(time))?;
    }
    writeln!(out, "  </metadata>")?;

    for waypoint in &doc.waypoints {
        write_point(out, "  ", "wpt", waypoint)?;
    }

    writeln!(out, "  <trk>")?;
    write_text(out, "    ", "name", doc.track_name.as_deref())?;
    write_text(out, "    ", "desc", doc.track_description.as_deref())?;
    writeln!(out, "    <trkseg>")?;
    for point in &doc.track_points {
        write_point(out, "      ", "trkpt", point)?;
    }
    writeln!(out, "    </trkseg>")?;
    writeln!(out, "  </trk>")?;
    writeln!(out, "</gpx>")
}

fn write_point(out: &mut String, indent: &str, tag: &str, point: &GpxPoint) -> fmt::Result {
    writeln!(
        out,
        r#"{indent}<{tag} lat="{}" lon="{}">"#,
        point.latitude, point.longitude
    )?;

    let child = format!("{indent}  ");
    if let Some(ele) = point.elevation {
        writeln!(out, "{child}<ele>{ele}</ele>")?;
    }
    if let Some(time) = &point.time {
        writeln!(out, "{child}<time>{}</time>", format_time(time))?;
    }
    if let Some(speed) = point.speed {
        writeln!(out, "{child}<speed>{speed}</speed>")?;
    }
    if let Some(course) = point.course {
        writeln!(out, "{child}<course>{course}</course>")?;
    }
    write_text(out, &child, "name", point.name.as_deref())?;
    write_text(out, &child, "desc", point.description.as_deref())?;
    write_text(out, &child, "sym", point.symbol.as_deref())?;

    writeln!(out, "{indent}</{tag}>")
}

fn write_text(out: &mut String, indent: &str, tag: &str, text: Option<&str>) -> fmt::Result {
    match text {
        Some(text) => writeln!(out, "{indent}<{tag}>{}</{tag}>", escape(text)),
        None => Ok(()),
    }
}
