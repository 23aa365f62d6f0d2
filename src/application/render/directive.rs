use lol_html::html_content::{ContentType, Element};
use serde_json::{Map, Value};

use super::{
    binding::LinkContext,
    error::{BindingError, ModuleError},
    expr::{base_filters, display, is_truthy},
    module::{CORE_MODULE, Module},
};

/// Behaviour attached to every element matching [`Directive::selector`].
///
/// Linking runs inside a binding pass: a directive reads the element,
/// evaluates expressions against the pass scope and rewrites the element in
/// place. It may queue deferred calls through the context; their results
/// are visible to the next pass.
pub trait Directive: Send + Sync {
    fn name(&self) -> &str;

    /// CSS selector understood by the markup rewriter.
    fn selector(&self) -> &str;

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError>;
}

/// Attribute value of `name`, or a directive error when it is missing.
pub fn required_attribute(
    element: &Element<'_, '_>,
    directive: &str,
    name: &str,
) -> Result<String, BindingError> {
    element
        .get_attribute(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| BindingError::directive(directive, format!("missing `{name}` attribute")))
}

/// `cms-if="expr"`: drop the element when the expression is falsy.
struct IfDirective;

impl Directive for IfDirective {
    fn name(&self) -> &str {
        "cms-if"
    }

    fn selector(&self) -> &str {
        "[cms-if]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let expression = required_attribute(element, self.name(), "cms-if")?;
        if !is_truthy(&ctx.evaluate(&expression)?) {
            element.remove();
        }
        Ok(())
    }
}

/// `cms-bind="expr"`: replace the content with the escaped value.
struct BindDirective;

impl Directive for BindDirective {
    fn name(&self) -> &str {
        "cms-bind"
    }

    fn selector(&self) -> &str {
        "[cms-bind]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let expression = required_attribute(element, self.name(), "cms-bind")?;
        let value = ctx.evaluate(&expression)?;
        ctx.replace_content(element, &display(&value), ContentType::Text);
        Ok(())
    }
}

/// `cms-bind-html="expr"`: replace the content with sanitized markup.
struct BindHtmlDirective;

impl Directive for BindHtmlDirective {
    fn name(&self) -> &str {
        "cms-bind-html"
    }

    fn selector(&self) -> &str {
        "[cms-bind-html]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let expression = required_attribute(element, self.name(), "cms-bind-html")?;
        let value = ctx.evaluate(&expression)?;
        let clean = ammonia::clean(&display(&value));
        ctx.replace_content(element, &clean, ContentType::Html);
        Ok(())
    }
}

/// Custom element backed by a markup template.
///
/// The host's attributes are exposed to the template as `attrs`; the
/// template is bound against that child scope and becomes the host's
/// content.
pub struct ComponentDirective {
    tag: String,
    template: String,
}

impl ComponentDirective {
    pub fn new(tag: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            template: template.into(),
        }
    }
}

impl Directive for ComponentDirective {
    fn name(&self) -> &str {
        &self.tag
    }

    fn selector(&self) -> &str {
        &self.tag
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let attrs = element
            .attributes()
            .iter()
            .map(|attr| (attr.name(), Value::String(attr.value())))
            .collect::<Map<_, _>>();
        let child = ctx.scope().overlay("attrs", Value::Object(attrs));
        let html = ctx.bind_with(child.view(), &self.template)?;
        ctx.replace_content(element, &html, ContentType::Html);
        Ok(())
    }
}

/// The module every runtime loads before its extensions.
pub fn core_module() -> Result<Module, ModuleError> {
    Module::new(CORE_MODULE)
        .with_filters(&base_filters())
        .with_directive(IfDirective)?
        .with_directive(BindDirective)?
        .with_directive(BindHtmlDirective)
}
