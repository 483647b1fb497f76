//! GPX parsing.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use super::{parse_time, GpxDocument, GpxPoint};
use crate::error::{Error, Result};

/// Parse a GPX XML string.
///
/// Points from every `<trkseg>` of every `<trk>` are concatenated. Points
/// with missing or out-of-range coordinates are skipped. Unknown elements,
/// routes and extensions are ignored.
///
/// # Errors
///
/// Returns [`Error::Xml`] for malformed XML, or [`Error::InvalidGpx`] when the
/// root element is not `<gpx>`.
pub fn parse_gpx(xml: &str) -> Result<GpxDocument> {
    let mut reader = Reader::from_str(xml);
    let mut doc = GpxDocument::default();
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"gpx" => saw_root = true,
                b"metadata" if saw_root => parse_metadata(&mut reader, &mut doc)?,
                b"wpt" if saw_root => {
                    if let Some(point) = parse_point(&e, &mut reader)? {
                        doc.waypoints.push(point);
                    }
                }
                b"trk" if saw_root => parse_track(&mut reader, &mut doc)?,
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"gpx" => saw_root = true,
                b"wpt" if saw_root => doc.waypoints.extend(bare_point(&e)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::invalid_gpx("missing <gpx> root element"));
    }
    Ok(doc)
}

fn parse_metadata<'a>(reader: &mut Reader<&'a [u8]>, doc: &mut GpxDocument) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => doc.name = Some(read_text_owned(reader, &e)?),
                b"desc" => doc.description = Some(read_text_owned(reader, &e)?),
                b"time" => doc.time = parse_time(&read_text_owned(reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"metadata" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn parse_track<'a>(reader: &mut Reader<&'a [u8]>, doc: &mut GpxDocument) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                // A file with several tracks keeps the first track's name
                b"name" => {
                    let name = read_text_owned(reader, &e)?;
                    doc.track_name.get_or_insert(name);
                }
                b"desc" => {
                    let desc = read_text_owned(reader, &e)?;
                    doc.track_description.get_or_insert(desc);
                }
                b"trkseg" => parse_segment(reader, doc)?,
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"trk" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn parse_segment<'a>(reader: &mut Reader<&'a [u8]>, doc: &mut GpxDocument) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"trkpt" {
                    if let Some(point) = parse_point(&e, reader)? {
                        doc.track_points.push(point);
                    }
                } else {
                    reader.read_to_end(e.name())?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"trkpt" => {
                doc.track_points.extend(bare_point(&e));
            }
            Event::End(e) if e.local_name().as_ref() == b"trkseg" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

/// Read the `lat`/`lon` attributes of a point element.
///
/// Returns `None` when either is missing, unparsable or out of range.
fn parse_lat_lon(e: &BytesStart<'_>) -> Option<(f64, f64)> {
    let mut lat = None;
    let mut lon = None;

    for attr in e.attributes().flatten() {
        let Ok(value) = std::str::from_utf8(&attr.value) else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"lat" => lat = value.trim().parse::<f64>().ok(),
            b"lon" => lon = value.trim().parse::<f64>().ok(),
            _ => {}
        }
    }

    let (lat, lon) = (lat?, lon?);
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

fn bare_point(e: &BytesStart<'_>) -> Option<GpxPoint> {
    match parse_lat_lon(e) {
        Some((lat, lon)) => Some(GpxPoint::new(lat, lon)),
        None => {
            warn!("Skipping GPX point with invalid coordinates");
            None
        }
    }
}

/// Parse a point element and its children, after its start tag was read.
fn parse_point<'a>(
    start: &BytesStart<'a>,
    reader: &mut Reader<&'a [u8]>,
) -> Result<Option<GpxPoint>> {
    let Some((lat, lon)) = parse_lat_lon(start) else {
        warn!("Skipping GPX point with invalid coordinates");
        reader.read_to_end(start.name())?;
        return Ok(None);
    };

    let mut point = GpxPoint::new(lat, lon);
    let end_name = start.name().0.to_vec();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ele" => point.elevation = read_number(reader, &e)?,
                b"time" => point.time = parse_time(&read_text_owned(reader, &e)?),
                b"speed" => point.speed = read_number(reader, &e)?,
                b"course" => point.course = read_number(reader, &e)?,
                b"name" => point.name = Some(read_text_owned(reader, &e)?),
                b"desc" => point.description = Some(read_text_owned(reader, &e)?),
                b"sym" => point.symbol = Some(read_text_owned(reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Some(point))
}

fn read_number<'a>(reader: &mut Reader<&'a [u8]>, start: &BytesStart<'_>) -> Result<Option<f64>> {
    Ok(read_text_owned(reader, start)?.trim().parse().ok())
}

/// Collect the text content of an element, resolving entity and character
/// references.
fn read_text_owned<'a>(reader: &mut Reader<&'a [u8]>, start: &BytesStart<'_>) -> Result<String> {
    let end_name = start.name().0.to_vec();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Text(e) => text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default()),
            Event::CData(e) => text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default()),
            Event::GeneralRef(e) => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    text.push(ch);
                } else {
                    match std::str::from_utf8(e.as_ref()).unwrap_or_default() {
                        "amp" => text.push('&'),
                        "lt" => text.push('<'),
                        "gt" => text.push('>'),
                        "quot" => text.push('"'),
                        "apos" => text.push('\''),
                        other => warn!(entity = other, "Dropping unknown XML entity"),
                    }
                }
            }
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::gpx::write_gpx;

    #[test]
    fn test_parse_minimal_document() {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1" xmlns="http://www.topografix.com/GPX/1/1">
  <wpt lat="35.6762" lon="139.6503"/>
  <trk><trkseg><trkpt lat="1.5" lon="2.5"/></trkseg></trk>
</gpx>"#;
        let doc = parse_gpx(xml).unwrap();
        assert_eq!(doc.waypoints.len(), 1);
        assert!((doc.waypoints[0].latitude - 35.6762).abs() < 1e-10);
        assert_eq!(doc.track_points, vec![GpxPoint::new(1.5, 2.5)]);
    }

    #[test]
    fn test_parse_point_children() {
        let xml = r#"<gpx>
  <metadata><name>Ride</name><desc>Evening</desc><time>2024-06-01T08:00:00Z</time></metadata>
  <trk>
    <name>Track</name>
    <trkseg>
      <trkpt lat="10" lon="20">
        <ele>101.5</ele>
        <time>2024-06-01T08:00:01.250Z</time>
        <speed>4.2</speed>
        <course>90</course>
        <extensions><hr>140</hr></extensions>
        <sym>Flag</sym>
      </trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let doc = parse_gpx(xml).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Ride"));
        assert_eq!(doc.description.as_deref(), Some("Evening"));
        assert_eq!(doc.time, Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
        assert_eq!(doc.track_name.as_deref(), Some("Track"));

        let point = &doc.track_points[0];
        assert_eq!(point.elevation, Some(101.5));
        assert_eq!(point.speed, Some(4.2));
        assert_eq!(point.course, Some(90.0));
        assert_eq!(point.symbol.as_deref(), Some("Flag"));
        assert_eq!(
            point.time,
            Some(Utc.timestamp_millis_opt(1_717_228_801_250).unwrap())
        );
    }

    #[test]
    fn test_segments_are_concatenated() {
        let xml = r#"<gpx><trk>
  <trkseg><trkpt lat="0" lon="0"/><trkpt lat="0" lon="1"/></trkseg>
  <trkseg><trkpt lat="0" lon="2"/></trkseg>
</trk></gpx>"#;
        let doc = parse_gpx(xml).unwrap();
        let lons: Vec<f64> = doc.track_points.iter().map(|p| p.longitude).collect();
        assert_eq!(lons, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_invalid_points_are_skipped() {
        let xml = r#"<gpx>
  <wpt lon="1"><name>no lat</name></wpt>
  <wpt lat="abc" lon="1"/>
  <wpt lat="95" lon="1"/>
  <wpt lat="5" lon="6"><name>kept</name></wpt>
</gpx>"#;
        let doc = parse_gpx(xml).unwrap();
        assert_eq!(doc.waypoints.len(), 1);
        assert_eq!(doc.waypoints[0].name.as_deref(), Some("kept"));
    }

    #[test]
    fn test_entities_and_cdata_resolve() {
        let xml = r#"<gpx>
  <wpt lat="1" lon="2"><name>A &amp; B &lt;test&gt;</name><desc><![CDATA[<raw>]]> &#65;&#x42;</desc></wpt>
</gpx>"#;
        let doc = parse_gpx(xml).unwrap();
        assert_eq!(doc.waypoints[0].name.as_deref(), Some("A & B <test>"));
        assert_eq!(doc.waypoints[0].description.as_deref(), Some("<raw> AB"));
    }

    #[test]
    fn test_escaped_name_round_trips() {
        let doc = GpxDocument {
            waypoints: vec![GpxPoint {
                name: Some("A & B <test>".to_string()),
                description: Some(r#"it's "fine""#.to_string()),
                ..GpxPoint::new(1.0, 2.0)
            }],
            ..GpxDocument::default()
        };
        let xml = write_gpx(&doc);
        assert!(xml.contains("&amp;"));
        assert!(xml.contains("&lt;"));
        assert!(xml.contains("&gt;"));

        let parsed = parse_gpx(&xml).unwrap();
        assert_eq!(parsed.waypoints[0].name.as_deref(), Some("A & B <test>"));
        assert_eq!(parsed.waypoints[0].description.as_deref(), Some(r#"it's "fine""#));
    }

    #[test]
    fn test_non_gpx_input_is_rejected() {
        let err = parse_gpx("just some text").unwrap_err();
        assert!(matches!(err, Error::InvalidGpx { .. }));

        let err = parse_gpx("<kml><Placemark/></kml>").unwrap_err();
        assert!(matches!(err, Error::InvalidGpx { .. }));
    }

    #[test]
    fn test_mismatched_tags_are_xml_errors() {
        let err = parse_gpx("<gpx><trk></wpt></gpx>").unwrap_err();
        assert!(matches!(err, Error::Xml(_)));
    }
}
