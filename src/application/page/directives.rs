//! The `cms` module: container slots and server function calls.

use lol_html::html_content::{ContentType, Element};
use serde_json::Value;
use tracing::debug;

use crate::{
    application::{
        render::{
            BindingError, Directive, LinkContext, Module, ModuleError, PendingCall, Resolve,
            display, required_attribute,
        },
        server_fn::ServerFunctions,
        types::TypesBuilder,
    },
    domain::content::{ContainerContent, ContainerItem},
};

pub const CMS_MODULE: &str = "cms";

pub fn cms_module() -> Result<Module, ModuleError> {
    Module::new(CMS_MODULE)
        .with_directive(ContainerDirective)?
        .with_directive(ServerFnDirective)
}

/// `cms-container="id"`: fill the element with the content of container `id`.
///
/// Markup content is bound in place. Item lists are rendered through each
/// item type's template with `model` bound to the referenced list element.
/// Without content the template's own children are kept.
struct ContainerDirective;

impl ContainerDirective {
    fn render_items(
        &self,
        items: Vec<ContainerItem>,
        ctx: &LinkContext<'_>,
    ) -> Result<String, BindingError> {
        let types = ctx
            .scope()
            .capability::<TypesBuilder>()
            .ok_or_else(|| BindingError::directive(self.name(), "type metadata is not available"))?;

        let mut html = String::new();
        for item in items {
            let entry = types.get(&item.type_name).ok_or_else(|| {
                BindingError::directive(self.name(), format!("unknown type `{}`", item.type_name))
            })?;
            let template = entry.template.as_deref().ok_or_else(|| {
                BindingError::directive(
                    self.name(),
                    format!("type `{}` has no template", item.type_name),
                )
            })?;
            let Some(model) = entry.find(&item.reference) else {
                debug!(
                    target = "vellum::application::page",
                    type_name = %item.type_name,
                    reference = %item.reference,
                    "container item refers to a missing element"
                );
                continue;
            };
            let child = ctx.scope().overlay("model", model.clone());
            html.push_str(&ctx.bind_with(child.view(), template)?);
        }
        Ok(html)
    }
}

impl Directive for ContainerDirective {
    fn name(&self) -> &str {
        "cms-container"
    }

    fn selector(&self) -> &str {
        "[cms-container]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let id = required_attribute(element, self.name(), "cms-container")?;
        let content = ContainerContent::from_value(
            ctx.scope()
                .resolve("containers")
                .and_then(|containers| containers.get(id.trim())),
        )
        .map_err(|err| BindingError::directive(self.name(), err.to_string()))?;

        let html = match content {
            ContainerContent::Empty => return Ok(()),
            ContainerContent::Markup(markup) => ctx.bind(&markup)?,
            ContainerContent::Items(items) => self.render_items(items, ctx)?,
        };
        ctx.replace_content(element, &html, ContentType::Html);
        Ok(())
    }
}

/// `cms-fn="name"` with optional `cms-args='[…]'`: call a server function.
///
/// The first pass defers the call; once the result is in the scope, string
/// results are bound as markup and anything else is rendered as text.
struct ServerFnDirective;

impl Directive for ServerFnDirective {
    fn name(&self) -> &str {
        "cms-fn"
    }

    fn selector(&self) -> &str {
        "[cms-fn]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let name = required_attribute(element, self.name(), "cms-fn")?
            .trim()
            .to_string();
        let args = match element.get_attribute("cms-args") {
            Some(raw) => {
                let raw = ctx.interpolate(&raw)?;
                serde_json::from_str::<Vec<Value>>(&raw).map_err(|err| {
                    BindingError::directive(self.name(), format!("`cms-args` must be a JSON array: {err}"))
                })?
            }
            None => Vec::new(),
        };
        let key = format!("cms-fn:{name}:{}", Value::Array(args.clone()));

        match ctx.scope().result(&key) {
            Some(Value::String(markup)) => {
                let html = ctx.bind(markup)?;
                ctx.replace_content(element, &html, ContentType::Html);
            }
            Some(value) => ctx.replace_content(element, &display(value), ContentType::Text),
            None => {
                let functions = ctx.scope().capability::<ServerFunctions>().ok_or_else(|| {
                    BindingError::directive(self.name(), "server functions are not available")
                })?;
                let call_name = name.clone();
                let call_args = args.clone();
                ctx.defer(
                    PendingCall::new(name, args, async move {
                        let outcome = functions.call(&call_name, call_args).await;
                        outcome
                            .map(Some)
                            .map_err(|err| BindingError::call(call_name, err))
                    })
                    .storing_into(key),
                );
            }
        }
        Ok(())
    }
}
