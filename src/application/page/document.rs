//! Head/body editing of a full HTML document.

use std::cell::Cell;

use lol_html::{
    RewriteStrSettings, Selector, element,
    html_content::{ContentType, Element},
    rewrite_str,
};
use thiserror::Error;

const BODY_START: &str = "<!--vellum:body-start-->";
const BODY_END: &str = "<!--vellum:body-end-->";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document rewrite failed: {0}")]
    Rewrite(String),
    #[error("invalid selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("invalid attribute name `{0}`")]
    InvalidAttribute(String),
    #[error("document has no body")]
    MissingBody,
}

/// A document normalised to `html`/`head`/`body`, edited through
/// successive rewrites.
#[derive(Debug, Clone)]
pub struct DocumentEditor {
    html: String,
}

impl DocumentEditor {
    /// Load `markup`, wrapping fragments into a document and adding a
    /// missing `head` or `</body>`.
    pub fn load(markup: &str) -> Result<Self, DocumentError> {
        let has_head = Cell::new(false);
        let has_body = Cell::new(false);
        rewrite_str(
            markup,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("head", |_| {
                        has_head.set(true);
                        Ok(())
                    }),
                    element!("body", |_| {
                        has_body.set(true);
                        Ok(())
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| DocumentError::Rewrite(err.to_string()))?;

        if !has_body.get() {
            return Ok(Self {
                html: format!(
                    "<!DOCTYPE html><html><head></head><body>{markup}</body></html>"
                ),
            });
        }

        let mut html = markup.to_string();
        if !html.to_ascii_lowercase().contains("</body") {
            match html.to_ascii_lowercase().rfind("</html") {
                Some(idx) => html.insert_str(idx, "</body>"),
                None => html.push_str("</body>"),
            }
        }

        let mut document = Self { html };
        if !has_head.get() {
            document.edit("body", |el| {
                el.before("<head></head>", ContentType::Html);
                Ok(())
            })?;
        }
        Ok(document)
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }

    /// Inner markup of `body`.
    pub fn body_inner(&self) -> Result<String, DocumentError> {
        let marked = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("body", |el| {
                    el.prepend(BODY_START, ContentType::Html);
                    el.append(BODY_END, ContentType::Html);
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| DocumentError::Rewrite(err.to_string()))?;

        let start = marked.find(BODY_START).ok_or(DocumentError::MissingBody)? + BODY_START.len();
        let end = marked.rfind(BODY_END).ok_or(DocumentError::MissingBody)?;
        Ok(marked.get(start..end).unwrap_or_default().to_string())
    }

    pub fn prepend_head(&mut self, content: &str) -> Result<(), DocumentError> {
        self.edit("head", |el| {
            el.prepend(content, ContentType::Html);
            Ok(())
        })
    }

    pub fn append_head(&mut self, content: &str) -> Result<(), DocumentError> {
        self.edit("head", |el| {
            el.append(content, ContentType::Html);
            Ok(())
        })
    }

    pub fn prepend_body(&mut self, content: &str) -> Result<(), DocumentError> {
        self.edit("body", |el| {
            el.prepend(content, ContentType::Html);
            Ok(())
        })
    }

    pub fn replace_body(&mut self, content: &str) -> Result<(), DocumentError> {
        self.edit("body", |el| {
            el.set_inner_content(content, ContentType::Html);
            Ok(())
        })
    }

    pub fn set_body_attribute(&mut self, name: &str, value: &str) -> Result<(), DocumentError> {
        self.edit("body", |el| {
            el.set_attribute(name, value)
                .map_err(|_| DocumentError::InvalidAttribute(name.to_string()))
        })
    }

    /// Rewrite every element matching `selector`.
    pub fn edit(
        &mut self,
        selector: &str,
        mut apply: impl FnMut(&mut Element<'_, '_>) -> Result<(), DocumentError>,
    ) -> Result<(), DocumentError> {
        selector
            .parse::<Selector>()
            .map_err(|err| DocumentError::InvalidSelector {
                selector: selector.to_string(),
                message: err.to_string(),
            })?;

        let failure = Cell::new(None);
        let rewritten = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(selector, |el| {
                    if let Err(err) = apply(el) {
                        failure.set(Some(err));
                        return Err("document edit aborted".into());
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        );

        match rewritten {
            Ok(html) => {
                self.html = html;
                Ok(())
            }
            Err(err) => Err(failure
                .take()
                .unwrap_or_else(|| DocumentError::Rewrite(err.to_string()))),
        }
    }
}
