//! Site map of the content directory.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Directory,
    ContainerDirectory,
    File,
}

/// One entry of the site map. Container directories (those holding an
/// `index.json`) carry a pointer to the page template that renders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteNode {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_template: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SiteNode>,
}

impl SiteNode {
    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SiteNode) -> bool) -> bool {
        if visit(self) {
            return true;
        }
        self.children.iter().any(|child| child.walk(visit))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteTree {
    pub tree: SiteNode,
    pub templates: Vec<String>,
    pub base_url_path: String,
}

impl SiteTree {
    /// Page template pointer (relative to the site base) of the container
    /// directory addressed by `request_path`.
    pub fn template_for(&self, request_path: &str) -> Option<&str> {
        let mut found = None;
        self.tree.walk(&mut |node| {
            let matches = node.kind == NodeKind::ContainerDirectory
                && (node.path == request_path || format!("/{}", node.path) == request_path);
            if matches {
                found = node.page_template.as_deref();
            }
            matches
        });
        found
    }

    pub fn container_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.tree.walk(&mut |node| {
            if node.kind == NodeKind::ContainerDirectory {
                paths.push(node.path.as_str());
            }
            false
        });
        paths
    }
}
