use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::util::{local_name, resolve_entity, resolve_href};

use super::attr_string;

/// A node of the NCX navigation map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    /// Archive path of the target document.
    pub path: String,
    pub fragment: Option<String>,
    pub children: Vec<TocEntry>,
}

struct NavPointState {
    label: String,
    src: Option<String>,
    children: Vec<TocEntry>,
}

impl NavPointState {
    fn new() -> Self {
        Self {
            label: String::new(),
            src: None,
            children: Vec::new(),
        }
    }
}

/// Parse an NCX document. `content@src` hrefs are resolved against `base_dir`.
pub fn parse_ncx(content: &str, base_dir: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);

    let mut stack = vec![NavPointState::new()];
    let mut in_label = false;
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::CorruptArchive(format!("unreadable NCX: {e}")))?;

        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navPoint" => stack.push(NavPointState::new()),
                b"navLabel" => in_label = true,
                b"text" => in_text = in_label,
                b"content" => set_src(&mut stack, attr_string(&e, b"src")),
                _ => {}
            },
            Event::Empty(e) => {
                if local_name(e.name().as_ref()) == b"content" {
                    set_src(&mut stack, attr_string(&e, b"src"));
                }
            }
            Event::Text(e) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if in_text
                    && let Some(state) = stack.last_mut()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.label.push_str(&resolved);
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navLabel" => in_label = false,
                b"navPoint" => {
                    // The root state is never popped here.
                    if stack.len() > 1
                        && let Some(state) = stack.pop()
                        && let Some(parent) = stack.last_mut()
                    {
                        match finish(state, base_dir) {
                            Ok(entry) => parent.children.push(entry),
                            // Points without a target still contribute their children.
                            Err(children) => parent.children.extend(children),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stack.into_iter().next().map(|s| s.children).unwrap_or_default())
}

fn set_src(stack: &mut [NavPointState], src: Option<String>) {
    if let Some(state) = stack.last_mut()
        && state.src.is_none()
    {
        state.src = src;
    }
}

fn finish(state: NavPointState, base_dir: &str) -> std::result::Result<TocEntry, Vec<TocEntry>> {
    let Some(src) = state.src else {
        return Err(state.children);
    };
    let fragment = src
        .split_once('#')
        .map(|(_, f)| f.to_string())
        .filter(|f| !f.is_empty());
    Ok(TocEntry {
        label: state.label.split_whitespace().collect::<Vec<_>>().join(" "),
        path: resolve_href(base_dir, &src),
        fragment,
        children: state.children,
    })
}
