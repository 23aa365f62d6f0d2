//! File-backed site: the container directory tree under the site base.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    application::repos::{SiteRepo, StoreError},
    domain::{
        content::PageContent,
        site::{NodeKind, SiteNode, SiteTree},
    },
};

pub const PAGE_FILE: &str = "index.json";
pub const TEMPLATE_FILE: &str = "index.html";
pub const TEMPLATE_PAGE_DIR: &str = ".template-page";

#[derive(Debug, Clone)]
pub struct FsSiteRepo {
    base: PathBuf,
    base_url_path: String,
}

impl FsSiteRepo {
    pub fn new(base: impl Into<PathBuf>, base_url_path: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            base_url_path: base_url_path.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Join a site-relative path, refusing anything that escapes the base.
    fn resolve(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::invalid(
                relative.display().to_string(),
                "path escapes the site base",
            ));
        }
        Ok(self.base.join(relative))
    }
}

async fn read_file(path: &Path) -> Result<String, StoreError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
                StoreError::NotFound(path.display().to_string())
            }
            _ => StoreError::from_storage(err),
        })
}

#[async_trait]
impl SiteRepo for FsSiteRepo {
    async fn site_tree(&self) -> Result<SiteTree, StoreError> {
        let base = self.base.clone();
        let base_url_path = self.base_url_path.clone();
        tokio::task::spawn_blocking(move || scan(&base, &base_url_path))
            .await
            .map_err(StoreError::from_storage)?
    }

    async fn page_content(&self, container_path: &str) -> Result<PageContent, StoreError> {
        let path = self.resolve(container_path)?.join(PAGE_FILE);
        let text = read_file(&path).await?;
        PageContent::from_json(&text)
            .map_err(|err| StoreError::invalid(path.display().to_string(), err))
    }

    async fn template(&self, path: &str) -> Result<String, StoreError> {
        read_file(&self.resolve(path)?).await
    }
}

/// Walk the site base and build its map.
///
/// Directories holding `index.json` are container directories and point at
/// the nearest `index.html` in themselves or an ancestor. Names of files in
/// `.template-page` are collected as page templates; other dot-directories
/// are skipped.
pub fn scan(base: &Path, base_url_path: &str) -> Result<SiteTree, StoreError> {
    let mut templates = Vec::new();
    let mut children = Vec::new();
    let root_is_container = scan_dir(base, base, &mut children, &mut templates)?;

    debug!(
        target = "vellum::infra::site",
        base = %base.display(),
        templates = templates.len(),
        "site scanned"
    );

    Ok(SiteTree {
        tree: SiteNode {
            text: "root".to_string(),
            kind: if root_is_container {
                NodeKind::ContainerDirectory
            } else {
                NodeKind::Directory
            },
            path: String::new(),
            page_template: Some(TEMPLATE_FILE.to_string()),
            children,
        },
        templates,
        base_url_path: base_url_path.to_string(),
    })
}

fn scan_dir(
    base: &Path,
    dir: &Path,
    nodes: &mut Vec<SiteNode>,
    templates: &mut Vec<String>,
) -> Result<bool, StoreError> {
    let mut is_container = false;

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(StoreError::from_storage)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == PAGE_FILE {
            is_container = true;
            continue;
        }

        let path = relative(base, entry.path());
        if entry.file_type().is_dir() {
            if name.starts_with('.') && name != TEMPLATE_PAGE_DIR {
                continue;
            }
            let mut children = Vec::new();
            let container = scan_dir(base, entry.path(), &mut children, templates)?;
            nodes.push(SiteNode {
                text: name,
                kind: if container {
                    NodeKind::ContainerDirectory
                } else {
                    NodeKind::Directory
                },
                page_template: container
                    .then(|| nearest_template(base, entry.path()))
                    .flatten(),
                path,
                children,
            });
        } else {
            if path.starts_with(&format!("{TEMPLATE_PAGE_DIR}/")) {
                templates.push(name.trim_end_matches(".tpl.json").to_string());
            }
            nodes.push(SiteNode {
                text: name,
                kind: NodeKind::File,
                path,
                page_template: None,
                children: Vec::new(),
            });
        }
    }

    Ok(is_container)
}

fn nearest_template(base: &Path, dir: &Path) -> Option<String> {
    dir.ancestors()
        .take_while(|ancestor| ancestor.starts_with(base))
        .map(|ancestor| ancestor.join(TEMPLATE_FILE))
        .find(|candidate| candidate.is_file())
        .map(|candidate| relative(base, &candidate))
}

fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(base: &Path, path: &str, contents: &str) {
        let path = base.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn scan_marks_containers_and_resolves_templates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        write(base, "index.html", "<html></html>");
        write(base, "index.json", "{}");
        write(base, "blog/index.json", "{}");
        write(base, "blog/index.html", "<html></html>");
        write(base, "blog/post/index.json", "{}");
        write(base, "about/index.json", "{}");
        write(base, "assets/site.css", "");
        write(base, ".template-page/landing.tpl.json", "{}");
        write(base, ".types/Article.json", "{}");

        let site = scan(base, "/").unwrap();

        assert_eq!(site.tree.kind, NodeKind::ContainerDirectory);
        assert_eq!(site.templates, vec!["landing"]);
        assert_eq!(site.template_for("/blog/post"), Some("blog/index.html"));
        assert_eq!(site.template_for("/about"), Some("index.html"));
        assert_eq!(site.template_for("/assets"), None);
        assert!(
            !site
                .tree
                .children
                .iter()
                .any(|node| node.text == ".types")
        );
        assert_eq!(
            site.container_paths(),
            vec!["", "about", "blog", "blog/post"]
        );
    }

    #[tokio::test]
    async fn reads_pages_and_templates_inside_the_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "blog/index.json", r#"{"containers": {"main": "x"}}"#);
        write(dir.path(), "index.html", "<p>t</p>");

        let repo = FsSiteRepo::new(dir.path(), "/");
        let page = repo.page_content("/blog").await.unwrap();
        assert_eq!(page.containers.len(), 1);
        assert_eq!(repo.template("index.html").await.unwrap(), "<p>t</p>");

        assert!(matches!(
            repo.page_content("/nope").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.page_content("index.html").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.template("../secret").await,
            Err(StoreError::InvalidData { .. })
        ));
    }
}
