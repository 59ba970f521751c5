//! WebDAV XML response rendering.
//!
//! PROPFIND answers with a `DAV:multistatus` document and LOCK with a
//! `DAV:lockdiscovery` property.  Both are assembled with `quick-xml`
//! events; any writer failure surfaces as [`DavError::Internal`].

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::errors::DavError;
use crate::paths::{encode_path, relative_key};
use crate::storage::backend::{http_date_or_now, RemoteObject};
use crate::storage::markers::is_marker;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Content type reported for collections.
pub const DIRECTORY_CONTENT_TYPE: &str = "httpd/unix-directory";

/// Media type of every XML body this module produces.
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Lock timeout granted by LOCK.
pub const LOCK_TIMEOUT: &str = "Second-3600";

/// Best-effort MIME type from the file extension.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Client-facing href of a resource: the root-relative path, percent
/// encoded, with a leading `/` and a trailing `/` for collections.
pub fn href_for(relative: &str, is_dir: bool) -> String {
    let mut href = format!("/{}", encode_path(relative));
    if is_dir && !href.ends_with('/') {
        href.push('/');
    }
    href
}

// -- Multistatus ---------------------------------------------------------------

/// Render the PROPFIND `<D:multistatus>` document.
///
/// `target` always comes first.  `children` are appended in order,
/// skipping the target's own key and directory markers.  Keys are made
/// relative to the collection `root` for hrefs and display names.
///
/// ```xml
/// <D:multistatus xmlns:D="DAV:">
///   <D:response>
///     <D:href>/docs/</D:href>
///     <D:propstat>
///       <D:prop>
///         <D:resourcetype><D:collection/></D:resourcetype>
///         <D:getcontenttype>httpd/unix-directory</D:getcontenttype>
///         <D:displayname>docs</D:displayname>
///         <D:getlastmodified>Sun, 06 Nov 1994 08:49:37 GMT</D:getlastmodified>
///       </D:prop>
///       <D:status>HTTP/1.1 200 OK</D:status>
///     </D:propstat>
///   </D:response>
/// </D:multistatus>
/// ```
pub fn render_multistatus(
    root: &str,
    target: &RemoteObject,
    children: &[RemoteObject],
) -> Result<String, DavError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let root_el = BytesStart::new("D:multistatus").with_attributes([("xmlns:D", "DAV:")]);
    writer.write_event(Event::Start(root_el))?;

    if !is_marker(&target.key) {
        write_response(&mut writer, root, target)?;
    }
    for child in children {
        if child.key == target.key || is_marker(&child.key) {
            continue;
        }
        write_response(&mut writer, root, child)?;
    }

    writer.write_event(Event::End(BytesEnd::new("D:multistatus")))?;
    finish(writer)
}

fn write_response(writer: &mut XmlWriter, root: &str, entry: &RemoteObject) -> Result<(), DavError> {
    let relative = relative_key(root, &entry.key);
    let is_dir = entry.is_dir();

    writer.write_event(Event::Start(BytesStart::new("D:response")))?;
    write_text_element(writer, "D:href", &href_for(relative, is_dir))?;
    writer.write_event(Event::Start(BytesStart::new("D:propstat")))?;
    writer.write_event(Event::Start(BytesStart::new("D:prop")))?;

    let content_type = if is_dir {
        writer.write_event(Event::Start(BytesStart::new("D:resourcetype")))?;
        writer.write_event(Event::Empty(BytesStart::new("D:collection")))?;
        writer.write_event(Event::End(BytesEnd::new("D:resourcetype")))?;
        DIRECTORY_CONTENT_TYPE.to_string()
    } else {
        writer.write_event(Event::Empty(BytesStart::new("D:resourcetype")))?;
        content_type_for(&entry.key)
    };
    write_text_element(writer, "D:getcontenttype", &content_type)?;

    let display_name = if relative.is_empty() {
        "/"
    } else {
        entry.base_name()
    };
    write_text_element(writer, "D:displayname", display_name)?;
    write_text_element(
        writer,
        "D:getlastmodified",
        &http_date_or_now(entry.last_modified.as_ref()),
    )?;
    if !is_dir {
        write_text_element(writer, "D:getcontentlength", &entry.size.to_string())?;
    }

    writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
    write_text_element(writer, "D:status", "HTTP/1.1 200 OK")?;
    writer.write_event(Event::End(BytesEnd::new("D:propstat")))?;
    writer.write_event(Event::End(BytesEnd::new("D:response")))?;
    Ok(())
}

// -- Lock discovery ------------------------------------------------------------

/// Render the LOCK response body granting an exclusive write lock.
pub fn render_lock_discovery(token: &str, owner: &str) -> Result<String, DavError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let root_el = BytesStart::new("D:prop").with_attributes([("xmlns:D", "DAV:")]);
    writer.write_event(Event::Start(root_el))?;
    writer.write_event(Event::Start(BytesStart::new("D:lockdiscovery")))?;
    writer.write_event(Event::Start(BytesStart::new("D:activelock")))?;

    write_wrapped_empty(&mut writer, "D:locktype", "D:write")?;
    write_wrapped_empty(&mut writer, "D:lockscope", "D:exclusive")?;
    write_text_element(&mut writer, "D:depth", "infinity")?;

    writer.write_event(Event::Start(BytesStart::new("D:owner")))?;
    write_text_element(&mut writer, "D:href", owner)?;
    writer.write_event(Event::End(BytesEnd::new("D:owner")))?;

    write_text_element(&mut writer, "D:timeout", LOCK_TIMEOUT)?;

    writer.write_event(Event::Start(BytesStart::new("D:locktoken")))?;
    write_text_element(&mut writer, "D:href", token)?;
    writer.write_event(Event::End(BytesEnd::new("D:locktoken")))?;

    writer.write_event(Event::End(BytesEnd::new("D:activelock")))?;
    writer.write_event(Event::End(BytesEnd::new("D:lockdiscovery")))?;
    writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
    finish(writer)
}

// -- Helpers -------------------------------------------------------------------

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut XmlWriter, tag: &str, text: &str) -> Result<(), DavError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Write `<parent><child/></parent>`.
fn write_wrapped_empty(writer: &mut XmlWriter, parent: &str, child: &str) -> Result<(), DavError> {
    writer.write_event(Event::Start(BytesStart::new(parent)))?;
    writer.write_event(Event::Empty(BytesStart::new(child)))?;
    writer.write_event(Event::End(BytesEnd::new(parent)))?;
    Ok(())
}

fn finish(writer: XmlWriter) -> Result<String, DavError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| DavError::Internal(anyhow::anyhow!("non UTF-8 XML output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::LastModified;

    const ROOT: &str = "alice/data";

    fn responses(xml: &str) -> usize {
        xml.matches("<D:response>").count()
    }

    #[test]
    fn test_target_comes_first() {
        let target = RemoteObject::directory("alice/data/docs", None);
        let children = vec![
            RemoteObject::file("alice/data/docs/a.txt", 3, None),
            RemoteObject::directory("alice/data/docs/sub", None),
        ];
        let xml = render_multistatus(ROOT, &target, &children).unwrap();

        assert_eq!(responses(&xml), 3);
        let first = xml.find("<D:href>/docs/</D:href>").unwrap();
        let file = xml.find("<D:href>/docs/a.txt</D:href>").unwrap();
        let sub = xml.find("<D:href>/docs/sub/</D:href>").unwrap();
        assert!(first < file && file < sub);
        assert!(xml.contains("xmlns:D=\"DAV:\""));
    }

    #[test]
    fn test_markers_and_self_are_skipped() {
        let target = RemoteObject::directory("alice/data/empty", None);
        let children = vec![
            RemoteObject::directory("alice/data/empty", None),
            RemoteObject::file("alice/data/empty/.keep", 0, None),
        ];
        let xml = render_multistatus(ROOT, &target, &children).unwrap();
        assert_eq!(responses(&xml), 1);
        assert!(!xml.contains(".keep"));
    }

    #[test]
    fn test_root_display_name_and_href() {
        let target = RemoteObject::directory(ROOT, None);
        let xml = render_multistatus(ROOT, &target, &[]).unwrap();
        assert!(xml.contains("<D:href>/</D:href>"));
        assert!(xml.contains("<D:displayname>/</D:displayname>"));
        assert!(xml.contains("<D:collection/>"));
        assert!(xml.contains(DIRECTORY_CONTENT_TYPE));
    }

    #[test]
    fn test_file_properties() {
        let target = RemoteObject::file(
            "alice/data/my report.pdf",
            1234,
            Some(LastModified::Epoch(784111777.0)),
        );
        let xml = render_multistatus(ROOT, &target, &[]).unwrap();
        assert!(xml.contains("<D:href>/my%20report.pdf</D:href>"));
        assert!(xml.contains("<D:displayname>my report.pdf</D:displayname>"));
        assert!(xml.contains("<D:getcontenttype>application/pdf</D:getcontenttype>"));
        assert!(xml.contains("<D:getcontentlength>1234</D:getcontentlength>"));
        assert!(xml.contains("<D:getlastmodified>Sun, 06 Nov 1994 08:49:37 GMT</D:getlastmodified>"));
        assert!(xml.contains("<D:status>HTTP/1.1 200 OK</D:status>"));
        assert!(!xml.contains("<D:collection/>"));
    }

    #[test]
    fn test_directory_has_no_content_length() {
        let target = RemoteObject::directory("alice/data/d", None);
        let xml = render_multistatus(ROOT, &target, &[]).unwrap();
        assert!(!xml.contains("getcontentlength"));
    }

    #[test]
    fn test_names_are_escaped() {
        let target = RemoteObject::file("alice/data/a&b<c>.txt", 1, None);
        let xml = render_multistatus(ROOT, &target, &[]).unwrap();
        assert!(xml.contains("<D:displayname>a&amp;b&lt;c&gt;.txt</D:displayname>"));
        assert!(xml.contains("<D:href>/a%26b%3Cc%3E.txt</D:href>"));
    }

    #[test]
    fn test_unknown_extension_content_type() {
        assert_eq!(content_type_for("x/blob.zzzunknown"), "application/octet-stream");
        assert_eq!(content_type_for("x/page.html"), "text/html");
    }

    #[test]
    fn test_lock_discovery() {
        let xml = render_lock_discovery("opaquelocktoken:abc", "alice").unwrap();
        assert!(xml.contains("<D:write/>"));
        assert!(xml.contains("<D:exclusive/>"));
        assert!(xml.contains("<D:depth>infinity</D:depth>"));
        assert!(xml.contains("<D:owner><D:href>alice</D:href></D:owner>"));
        assert!(xml.contains("<D:timeout>Second-3600</D:timeout>"));
        assert!(xml.contains("<D:locktoken><D:href>opaquelocktoken:abc</D:href></D:locktoken>"));
    }
}
