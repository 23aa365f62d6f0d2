//! One binding pass over a markup string.
//!
//! A pass is a pure function of the markup and the scope: attribute and
//! text markers are substituted, directives are linked, and any deferred
//! work the directives discover is pushed onto the invocation's call queue.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

use lol_html::{
    RewriteStrSettings, element, end_tag,
    html_content::{ContentType, Element, TextChunk},
    rewrite_str, text,
};
use serde_json::Value;

use super::{
    directive::Directive,
    error::BindingError,
    expr::{Expression, Filters, Interpolation, Part, display, has_markers},
    scope::{CallQueue, PendingCall, Scope, ScopeView},
};

/// Nested binds (components, containers, inserted markup) deeper than this
/// are treated as a cycle.
pub const MAX_BIND_DEPTH: usize = 16;

/// Directives and filters resolved by a runtime's injector.
#[derive(Clone, Default)]
pub struct Linker {
    directives: Vec<Arc<dyn Directive>>,
    filters: Filters,
}

impl Linker {
    pub(crate) fn new(directives: Vec<Arc<dyn Directive>>, filters: Filters) -> Self {
        Self { directives, filters }
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn directive_names(&self) -> impl Iterator<Item = &str> {
        self.directives.iter().map(|directive| directive.name())
    }

    /// Run one pass over `markup`, queueing deferred calls on `queue`.
    pub(crate) fn bind(
        &self,
        markup: &str,
        scope: &Scope,
        queue: &RefCell<CallQueue>,
    ) -> Result<String, BindingError> {
        Binder {
            linker: self,
            scope: ScopeView::new(scope),
            queue,
            depth: 0,
        }
        .bind(markup)
    }
}

struct Binder<'a> {
    linker: &'a Linker,
    scope: ScopeView<'a>,
    queue: &'a RefCell<CallQueue>,
    depth: usize,
}

impl Binder<'_> {
    /// Removed elements and elements whose content a directive replaced are
    /// not linked below: nothing inside them is interpolated and no
    /// directive inside them runs.
    fn bind(&self, markup: &str) -> Result<String, BindingError> {
        if self.depth > MAX_BIND_DEPTH {
            return Err(BindingError::DepthExceeded(MAX_BIND_DEPTH));
        }

        let failure: RefCell<Option<BindingError>> = RefCell::new(None);
        let text_buffer = RefCell::new(String::new());
        let ctx = LinkContext {
            binder: self,
            suppressed: Rc::new(Cell::new(0)),
            replaced: Cell::new(false),
        };

        let mut handlers = Vec::with_capacity(self.linker.directives.len() + 3);
        handlers.push(element!("*", |el| {
            if ctx.is_suppressed() {
                return Ok(());
            }
            interpolate_attributes(el, &ctx).or_else(|err| abort(&failure, err))
        }));
        for directive in &self.linker.directives {
            let directive: &dyn Directive = directive.as_ref();
            let ctx = &ctx;
            let failure = &failure;
            handlers.push(element!(directive.selector(), move |el| {
                if ctx.is_suppressed() {
                    return Ok(());
                }
                if let Err(err) = directive.link(el, ctx) {
                    return abort(failure, err);
                }
                if el.removed() {
                    return ctx.suppress_subtree(el);
                }
                Ok(())
            }));
        }
        handlers.push(element!("*", |el| {
            if ctx.replaced.take() && !ctx.is_suppressed() {
                return ctx.suppress_subtree(el);
            }
            Ok(())
        }));
        handlers.push(text!("*", |chunk| {
            if ctx.is_suppressed() {
                return Ok(());
            }
            interpolate_text(chunk, &text_buffer, &ctx).or_else(|err| abort(&failure, err))
        }));

        let rewritten = rewrite_str(
            markup,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::default()
            },
        );

        match rewritten {
            Ok(html) => Ok(html),
            Err(err) => Err(failure
                .borrow_mut()
                .take()
                .unwrap_or_else(|| BindingError::Markup(err.to_string()))),
        }
    }

    fn nested<'b>(&'b self, scope: ScopeView<'b>) -> Binder<'b> {
        Binder {
            linker: self.linker,
            scope,
            queue: self.queue,
            depth: self.depth + 1,
        }
    }
}

/// What a directive sees while it is being linked.
pub struct LinkContext<'a> {
    binder: &'a Binder<'a>,
    /// Open elements whose subtree is skipped.
    suppressed: Rc<Cell<usize>>,
    /// Set when a directive replaced the current element's content.
    replaced: Cell<bool>,
}

impl<'a> LinkContext<'a> {
    pub fn scope(&self) -> &ScopeView<'a> {
        &self.binder.scope
    }

    pub fn filters(&self) -> &Filters {
        &self.binder.linker.filters
    }

    pub fn evaluate(&self, source: &str) -> Result<Value, BindingError> {
        Expression::parse(source)?.evaluate(&self.binder.scope, self.filters())
    }

    /// Substitute `{{ … }}` markers without escaping.
    pub fn interpolate(&self, text: &str) -> Result<String, BindingError> {
        Interpolation::parse(text)?.render(&self.binder.scope, self.filters())
    }

    /// Bind a fragment against the current scope.
    pub fn bind(&self, markup: &str) -> Result<String, BindingError> {
        self.binder.nested(self.binder.scope).bind(markup)
    }

    /// Bind a fragment against a derived scope.
    pub fn bind_with(&self, scope: ScopeView<'_>, markup: &str) -> Result<String, BindingError> {
        self.binder.nested(scope).bind(markup)
    }

    /// Replace the element's content. The original children are dropped
    /// unlinked, so directives among them never run.
    pub fn replace_content(&self, element: &mut Element<'_, '_>, content: &str, kind: ContentType) {
        element.set_inner_content(content, kind);
        self.replaced.set(true);
    }

    /// Queue deferred work for the drain loop.
    ///
    /// Calls are keyed by their target: a second call for a target already
    /// queued in this pass is dropped and `false` is returned, so identical
    /// `{fn, args}` pairs on one page drain once and share the result.
    pub fn defer(&self, call: PendingCall) -> bool {
        self.binder.queue.borrow_mut().push(call)
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed.get() > 0
    }

    /// Skip everything up to the element's end tag. Elements without
    /// content have nothing to skip. An element closed implicitly never
    /// reports its end tag, so suppression then lasts to the end of the
    /// fragment.
    fn suppress_subtree(&self, el: &mut Element<'_, '_>) -> lol_html::HandlerResult {
        if !el.can_have_content() {
            return Ok(());
        }
        self.suppressed.set(self.suppressed.get() + 1);
        let suppressed = Rc::clone(&self.suppressed);
        el.on_end_tag(end_tag!(move |_| {
            suppressed.set(suppressed.get().saturating_sub(1));
            Ok(())
        }))
    }
}

fn abort(slot: &RefCell<Option<BindingError>>, err: BindingError) -> lol_html::HandlerResult {
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(err);
    }
    Err("binding aborted".into())
}

fn interpolate_attributes(el: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
    let marked = el
        .attributes()
        .iter()
        .filter_map(|attr| {
            let value = attr.value();
            has_markers(&value).then(|| (attr.name(), value))
        })
        .collect::<Vec<_>>();

    for (name, value) in marked {
        let rendered = ctx.interpolate(&value)?;
        el.set_attribute(&name, &rendered)
            .map_err(|err| BindingError::Markup(err.to_string()))?;
    }
    Ok(())
}

fn interpolate_text(
    chunk: &mut TextChunk<'_>,
    buffer: &RefCell<String>,
    ctx: &LinkContext<'_>,
) -> Result<(), BindingError> {
    let mut pending = buffer.borrow_mut();
    pending.push_str(chunk.as_str());
    if !chunk.last_in_text_node() {
        chunk.remove();
        return Ok(());
    }

    let text = std::mem::take(&mut *pending);
    drop(pending);

    if !has_markers(&text) {
        if text.len() != chunk.as_str().len() {
            chunk.replace(&text, ContentType::Html);
        }
        return Ok(());
    }

    let interpolation = Interpolation::parse(&text)?;
    let mut first = true;
    for part in interpolation.parts() {
        let (content, kind) = match part {
            Part::Literal(literal) => (literal.clone(), ContentType::Html),
            Part::Expr(expr) => (
                display(&expr.evaluate(ctx.scope(), ctx.filters())?),
                ContentType::Text,
            ),
        };
        if first {
            chunk.replace(&content, kind);
            first = false;
        } else {
            chunk.after(&content, kind);
        }
    }
    if first {
        chunk.remove();
    }
    Ok(())
}
