//! Semantic tree library.
//!
//! Turns indentation-based markdown outlines, optionally split across linked fragments,
//! into a tree of uniquely named nodes and answers structural queries over it.
//! Modules follow the pipeline: normalize and calibrate lines, realign the ancestry stack,
//! register nodes, then query the finished tree. The `site` module is a thin host adapter.

pub mod model {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------ Documents ------------------------------ */

    /// Content item backing a node. Supplied by the host once the tree is built.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Document {
        /// File stem the outline refers to.
        pub name: String,
        pub url: String,
        pub title: Option<String>,
        /// Collection or page type (`entries`, `posts`, `index`, ...).
        pub kind: String,
    }

    /// Kind reported for nodes without a backing document.
    pub const ZOMBIE_KIND: &str = "zombie";

    /// Whether a node has backing content.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(tag = "state", content = "document", rename_all = "snake_case")]
    pub enum Backing {
        /// Forward reference to content that does not exist yet (a "zombie").
        #[default]
        Unresolved,
        Resolved(Document),
    }

    /* -------------------------------- Nodes -------------------------------- */

    /// One outline entry or trunk fragment. `text` is unique across the tree.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Node {
        pub text: String,

        /// Ancestor names, root first, ending at the parent.
        #[serde(default)]
        pub ancestors: Vec<String>,

        /// Direct children in insertion order.
        #[serde(default)]
        pub children: Vec<String>,

        pub level: usize,

        /// 1-based line in the owning fragment; `None` for trunk nodes.
        pub line: Option<usize>,

        #[serde(default)]
        pub backing: Backing,
    }

    impl Node {
        pub fn new(
            text: impl Into<String>,
            ancestors: Vec<String>,
            level: usize,
            line: Option<usize>,
        ) -> Self {
            Self {
                text: text.into(),
                ancestors,
                children: vec![],
                level,
                line,
                backing: Backing::Unresolved,
            }
        }

        pub fn is_zombie(&self) -> bool {
            matches!(self.backing, Backing::Unresolved)
        }

        pub fn document(&self) -> Option<&Document> {
            match &self.backing {
                Backing::Resolved(doc) => Some(doc),
                Backing::Unresolved => None,
            }
        }

        /// Document url, or the node text for zombies.
        pub fn id(&self) -> &str {
            self.url()
        }

        pub fn url(&self) -> &str {
            match &self.backing {
                Backing::Resolved(doc) => &doc.url,
                Backing::Unresolved => &self.text,
            }
        }

        pub fn title(&self) -> &str {
            match &self.backing {
                Backing::Resolved(doc) => doc.title.as_deref().unwrap_or(&self.text),
                Backing::Unresolved => &self.text,
            }
        }

        pub fn kind(&self) -> &str {
            match &self.backing {
                Backing::Resolved(doc) => &doc.kind,
                Backing::Unresolved => ZOMBIE_KIND,
            }
        }

        pub fn parent(&self) -> Option<&str> {
            self.ancestors.last().map(String::as_str)
        }

        /// Queries accept either the derived identifier or the raw text.
        pub fn matches(&self, target: &str) -> bool {
            self.id() == target || self.text == target
        }
    }

    impl fmt::Display for Node {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "<Node text: '{}', ancestors: {:?}, children: {:?}>",
                self.text, self.ancestors, self.children
            )
        }
    }

    /* ---------------------------- Projections ---------------------------- */

    /// Flattened node view handed to the host (e.g. for a site map page).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MapEntry {
        pub text: String,
        pub url: String,
        pub ancestors: Vec<String>,
        pub children: Vec<String>,
    }

    impl From<&Node> for MapEntry {
        fn from(node: &Node) -> Self {
            Self {
                text: node.text.clone(),
                url: node.url().to_string(),
                ancestors: node.ancestors.clone(),
                children: node.children.clone(),
            }
        }
    }

    /// Root-to-parent path and every descendant of one node, as identifiers.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Lineage {
        pub ancestors: Vec<String>,
        pub descendants: Vec<String>,
    }

    /* ------------------------------- Options ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct BuildOptions {
        /// Fragments are link-only connectors and never become nodes themselves.
        #[serde(default)]
        pub virtual_trunk: bool,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum TreeError {
        #[error("Tree did not build, duplicate nodes found:\n\n{}\n", .names.join(", "))]
        DuplicateNodes { names: Vec<String> },
        #[error("Tree did not build, lines without a parent found:\n\n{}\n", .names.join(", "))]
        DetachedNodes { names: Vec<String> },
        #[error("content does not contain root fragment '{root}'; keys are: {}", .available.join(", "))]
        MissingRootFragment {
            root: String,
            available: Vec<String>,
        },
        #[error("no node named '{0}' in the tree")]
        UnknownNode(String),
    }
}

pub mod text {
    //! Canonical node names from raw outline lines.
    //!
    //! A line is `<indentation><bullet?><name>`; the name may be wrapped in `[[...]]`.
    //! Location-suffixed (`name-12-3`) and id-suffixed (`name-(ab12c)`) forms are reserved
    //! syntax and are left untouched.

    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while},
        error::VerboseError,
    };

    pub const OPEN_BRACKETS: &str = "[[";
    pub const CLOSE_BRACKETS: &str = "]]";

    pub const MARKDOWN_BULLET_ASTERISK: &str = "* ";
    pub const MARKDOWN_BULLET_DASH: &str = "- ";
    pub const MARKDOWN_BULLET_PLUS: &str = "+ ";

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    pub fn is_markdown_bullet(s: &str) -> bool {
        [
            MARKDOWN_BULLET_ASTERISK,
            MARKDOWN_BULLET_DASH,
            MARKDOWN_BULLET_PLUS,
        ]
        .contains(&s)
    }

    fn indentation(i: &str) -> PResult<'_, &str> {
        take_while(|c: char| c == ' ' || c == '\t')(i)
    }

    fn bullet(i: &str) -> PResult<'_, &str> {
        alt((
            tag(MARKDOWN_BULLET_ASTERISK),
            tag(MARKDOWN_BULLET_DASH),
            tag(MARKDOWN_BULLET_PLUS),
        ))(i)
    }

    /// Split a raw line into its leading spaces/tabs and the remainder.
    pub fn split_indent(line: &str) -> (&str, &str) {
        match indentation(line) {
            Ok((rest, ws)) => (ws, rest),
            Err(_) => ("", line),
        }
    }

    /// Canonical name: indentation, one bullet marker, link brackets and line breaks
    /// removed. Passes repeat until nothing changes, so the result is a fixed point.
    pub fn normalize(raw: &str) -> String {
        let mut current = strip_once(raw);
        loop {
            let next = strip_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn strip_once(raw: &str) -> String {
        let (_, text) = split_indent(raw);
        let text = match bullet(text) {
            Ok((rest, _)) => rest,
            Err(_) => text,
        };
        text.replace(OPEN_BRACKETS, "")
            .replace(CLOSE_BRACKETS, "")
            .replace(['\r', '\n'], "")
    }

}

pub mod indent {
    //! Indentation calibration: whitespace width per level, fixed by the first indented
    //! line of the root fragment.

    use crate::text::split_indent;
    use serde::{Deserialize, Serialize};

    pub const TAB_SIZE: usize = 4;

    /// Unit the builder falls back to when the root fragment never indents.
    pub const DEFAULT_CHUNK_SIZE: usize = 2;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Indentation {
        /// `None` until calibrated.
        chunk_size: Option<usize>,
        level_max: usize,
    }

    impl Indentation {
        /// Fix the unit from the first indented line and record the deepest level.
        ///
        /// Whitespace-only lines are skipped entirely: they neither fix the unit nor count
        /// toward the deepest level.
        pub fn calibrate<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
            let mut units = Self::default();
            for line in lines {
                let (ws, text) = split_indent(line);
                if text.trim().is_empty() {
                    continue;
                }
                if units.chunk_size.is_none() {
                    units.chunk_size = level_size(ws);
                }
                let level = units.level(whitespace_width(ws));
                units.level_max = units.level_max.max(level);
            }
            units
        }

        pub fn chunk_size(&self) -> Option<usize> {
            self.chunk_size
        }

        pub fn level_max(&self) -> usize {
            self.level_max
        }

        /// 1-based level for a whitespace width. Uncalibrated units yield a single level.
        pub fn level(&self, width: usize) -> usize {
            match self.chunk_size {
                Some(size) => width / size + 1,
                None => 1,
            }
        }

        pub fn pin_default(&mut self) {
            if self.chunk_size.is_none() {
                self.chunk_size = Some(DEFAULT_CHUNK_SIZE);
            }
        }
    }

    /// Width of one level as implied by a line's indentation.
    pub fn level_size(ws: &str) -> Option<usize> {
        match ws.chars().next() {
            Some(' ') => Some(ws.len()),
            Some('\t') => Some(TAB_SIZE),
            _ => None,
        }
    }

    /// Effective width: spaces count literally, tab-only indentation counts `TAB_SIZE` each.
    pub fn whitespace_width(ws: &str) -> usize {
        if ws.contains(' ') {
            ws.len()
        } else {
            ws.len() * TAB_SIZE
        }
    }

}

pub mod ancestry {
    //! Ancestry stack: the chain of open ancestors while walking an outline.

    /// An open ancestor and the level it was seen at.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Ancestor {
        pub name: String,
        pub level: usize,
    }

    /// How a new line relates to the top of the stack.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Relation {
        /// One level below the top.
        Child,
        /// Deeper than a plain child; the stack is kept as is.
        Deeper,
        /// Same level as the top.
        Sibling,
        /// Shallower than the top. Carries the number of entries popped; for a stack
        /// whose levels step by one that is `top.level - level + 1`.
        Ascend(usize),
    }

    impl Relation {
        pub fn between(top_level: usize, level: usize) -> Self {
            if top_level + 1 == level {
                Relation::Child
            } else if top_level == level {
                Relation::Sibling
            } else if top_level > level {
                Relation::Ascend(top_level - level + 1)
            } else {
                Relation::Deeper
            }
        }
    }

    /// Ancestor chain, root first. Each linked fragment receives its own clone.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct AncestryStack {
        entries: Vec<Ancestor>,
    }

    impl AncestryStack {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, name: impl Into<String>, level: usize) {
            self.entries.push(Ancestor {
                name: name.into(),
                level,
            });
        }

        pub fn top(&self) -> Option<&Ancestor> {
            self.entries.last()
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn names(&self) -> Vec<String> {
            self.entries.iter().map(|a| a.name.clone()).collect()
        }

        /// Drop closed ancestors so the top becomes the parent of a line at `level`.
        ///
        /// An upward jump stops at the first entry shallower than `level`, so an
        /// over-indented line never costs its shallower ancestors. Returns `None` for an
        /// empty stack.
        pub fn realign(&mut self, level: usize) -> Option<Relation> {
            match Relation::between(self.top()?.level, level) {
                Relation::Sibling => {
                    self.entries.pop();
                    Some(Relation::Sibling)
                }
                Relation::Ascend(_) => {
                    let mut popped = 0;
                    while self.top().is_some_and(|a| a.level >= level) {
                        self.entries.pop();
                        popped += 1;
                    }
                    Some(Relation::Ascend(popped))
                }
                relation => Some(relation),
            }
        }
    }

}

pub mod registry {
    use crate::model::Node;
    use indexmap::{IndexMap, IndexSet};
    use std::iter;

    /// Result of a uniqueness-checked insertion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Insertion {
        Added,
        Duplicate,
    }

    /// Name-indexed node store. Iteration follows creation order.
    #[derive(Debug, Clone, Default)]
    pub struct NodeRegistry {
        root: Option<String>,
        nodes: IndexMap<String, Node>,
        /// Petiole map: node name → fragment that owns it.
        trunk_map: IndexMap<String, String>,
        duplicates: IndexSet<String>,
    }

    impl NodeRegistry {
        pub fn add_root(&mut self, node: Node) -> Insertion {
            if self.reject_duplicate(&node.text) {
                return Insertion::Duplicate;
            }
            self.root = Some(node.text.clone());
            self.trunk_map.insert(node.text.clone(), node.text.clone());
            self.nodes.insert(node.text.clone(), node);
            Insertion::Added
        }

        /// Insert under `node.ancestors`, linking every consecutive pair of the chain
        /// (and its last entry to the node) exactly once.
        pub fn add_branch(&mut self, node: Node, owner: &str) -> Insertion {
            if self.reject_duplicate(&node.text) {
                return Insertion::Duplicate;
            }
            let next = node.ancestors.iter().skip(1).chain(iter::once(&node.text));
            for (parent, child) in node.ancestors.iter().zip(next) {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    if !parent.children.contains(child) {
                        parent.children.push(child.clone());
                    }
                }
            }
            self.trunk_map.insert(node.text.clone(), owner.to_string());
            self.nodes.insert(node.text.clone(), node);
            Insertion::Added
        }

        fn reject_duplicate(&mut self, name: &str) -> bool {
            if self.nodes.contains_key(name) {
                self.record_duplicate(name);
                true
            } else {
                false
            }
        }

        pub fn record_duplicate(&mut self, name: &str) {
            self.duplicates.insert(name.to_string());
        }

        pub fn duplicates(&self) -> impl Iterator<Item = &str> {
            self.duplicates.iter().map(String::as_str)
        }

        pub fn contains(&self, name: &str) -> bool {
            self.nodes.contains_key(name)
        }

        pub fn get(&self, name: &str) -> Option<&Node> {
            self.nodes.get(name)
        }

        pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
            self.nodes.get_mut(name)
        }

        pub fn root(&self) -> Option<&str> {
            self.root.as_deref()
        }

        pub fn nodes(&self) -> impl Iterator<Item = &Node> {
            self.nodes.values()
        }

        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.nodes.is_empty()
        }

        pub fn trunk_of(&self, name: &str) -> Option<&str> {
            self.trunk_map.get(name).map(String::as_str)
        }
    }

}

pub mod builder {
    //! Recursive tree builder.
    //!
    //! One fragment is consumed at a time. A line naming another pending fragment is a
    //! link: the builder recurses into that fragment with a copy of the ancestry computed
    //! so far, and the fragment takes the line's place in the tree.

    use crate::ancestry::AncestryStack;
    use crate::indent::{Indentation, whitespace_width};
    use crate::model::{Backing, BuildOptions, Document, MapEntry, Node, TreeError};
    use crate::registry::{Insertion, NodeRegistry};
    use crate::text::{normalize, split_indent};
    use indexmap::IndexMap;
    use tracing::{debug, warn};

    /// Fragment key used when a single outline is built.
    pub const SINGLE_OUTLINE_KEY: &str = "root";

    /* -------------------------------- Tree -------------------------------- */

    /// A successfully built tree. Read-only apart from attaching documents.
    #[derive(Debug, Clone, Default)]
    pub struct Tree {
        pub(crate) registry: NodeRegistry,
        pub(crate) indentation: Indentation,
        pub(crate) options: BuildOptions,
        pub(crate) fragment_keys: Vec<String>,
        pub(crate) unconsumed: Vec<String>,
    }

    impl Tree {
        /// Tree with no nodes, used by hosts when a build fails.
        pub fn empty(options: BuildOptions) -> Self {
            Self {
                options,
                ..Self::default()
            }
        }

        /// Build from one outline, keyed as `SINGLE_OUTLINE_KEY`.
        pub fn from_outline(content: &str, options: BuildOptions) -> Result<Self, TreeError> {
            Self::from_fragments([(SINGLE_OUTLINE_KEY, content)], SINGLE_OUTLINE_KEY, options)
        }

        /// Build from fragment key → outline text, starting at `root`.
        ///
        /// Fails eagerly when `root` is not a key. Duplicate names and lines that end up
        /// without a parent fail the whole build. Fragments no link ever reached are only
        /// reported through [`Tree::unconsumed_fragments`].
        pub fn from_fragments<K, V>(
            fragments: impl IntoIterator<Item = (K, V)>,
            root: &str,
            options: BuildOptions,
        ) -> Result<Self, TreeError>
        where
            K: Into<String>,
            V: AsRef<str>,
        {
            let pending: IndexMap<String, Vec<String>> = fragments
                .into_iter()
                .map(|(key, content)| {
                    let lines = content.as_ref().lines().map(str::to_string).collect();
                    (key.into(), lines)
                })
                .collect();

            let Some(root_lines) = pending.get(root) else {
                return Err(TreeError::MissingRootFragment {
                    root: root.to_string(),
                    available: pending.keys().cloned().collect(),
                });
            };
            let indentation = Indentation::calibrate(root_lines.iter().map(String::as_str));
            debug!(
                root,
                chunk_size = ?indentation.chunk_size(),
                level_max = indentation.level_max(),
                "calibrated indentation"
            );

            let fragment_keys = pending.keys().cloned().collect();
            let mut build = Build {
                registry: NodeRegistry::default(),
                indentation,
                virtual_trunk: options.virtual_trunk,
                pending,
                detached: vec![],
            };
            build.consume(root, AncestryStack::new(), 0);

            let Build {
                registry,
                indentation,
                pending,
                detached,
                ..
            } = build;

            let unconsumed: Vec<String> = pending.into_keys().collect();
            if !unconsumed.is_empty() {
                warn!("Some files were not processed: {}", unconsumed.join(", "));
            }

            let duplicates: Vec<String> = registry.duplicates().map(str::to_string).collect();
            if !duplicates.is_empty() {
                return Err(TreeError::DuplicateNodes { names: duplicates });
            }
            if !detached.is_empty() {
                return Err(TreeError::DetachedNodes { names: detached });
            }

            Ok(Self {
                registry,
                indentation,
                options,
                fragment_keys,
                unconsumed,
            })
        }

        pub fn root(&self) -> Option<&str> {
            self.registry.root()
        }

        pub fn root_node(&self) -> Option<&Node> {
            self.root().and_then(|r| self.registry.get(r))
        }

        pub fn get(&self, name: &str) -> Option<&Node> {
            self.registry.get(name)
        }

        /// Nodes in creation order.
        pub fn nodes(&self) -> impl Iterator<Item = &Node> {
            self.registry.nodes()
        }

        pub fn len(&self) -> usize {
            self.registry.len()
        }

        pub fn is_empty(&self) -> bool {
            self.registry.is_empty()
        }

        pub fn chunk_size(&self) -> Option<usize> {
            self.indentation.chunk_size()
        }

        pub fn level_max(&self) -> usize {
            self.indentation.level_max()
        }

        pub fn options(&self) -> BuildOptions {
            self.options
        }

        /// Fragment that owns `name`.
        pub fn trunk_of(&self, name: &str) -> Option<&str> {
            self.registry.trunk_of(name)
        }

        pub fn fragment_keys(&self) -> &[String] {
            &self.fragment_keys
        }

        pub fn unconsumed_fragments(&self) -> &[String] {
            &self.unconsumed
        }

        pub fn completeness_warning(&self) -> Option<String> {
            if self.unconsumed.is_empty() {
                None
            } else {
                Some(format!(
                    "Some files were not processed: {}",
                    self.unconsumed.join(", ")
                ))
            }
        }

        /// Resolve a zombie. Returns `false` if the tree has no such node.
        pub fn attach_document(&mut self, name: &str, document: Document) -> bool {
            match self.registry.get_mut(name) {
                Some(node) => {
                    node.backing = Backing::Resolved(document);
                    true
                }
                None => false,
            }
        }

        pub fn map_entries(&self) -> Vec<MapEntry> {
            self.nodes().map(MapEntry::from).collect()
        }
    }

    /* ------------------------------ Internals ------------------------------ */

    /// State owned by one build. `pending` is the remaining work: a fragment leaves it when
    /// its processing starts, so a link back to an in-progress fragment is a plain line.
    struct Build {
        registry: NodeRegistry,
        indentation: Indentation,
        virtual_trunk: bool,
        pending: IndexMap<String, Vec<String>>,
        detached: Vec<String>,
    }

    impl Build {
        fn consume(&mut self, key: &str, mut ancestors: AncestryStack, mut offset: usize) {
            let Some(lines) = self.pending.shift_remove(key) else {
                return;
            };
            debug!(fragment = key, offset, lines = lines.len(), "consuming fragment");

            if !self.virtual_trunk {
                let node = Node::new(key, ancestors.names(), offset, None);
                if self.registry.root().is_none() {
                    self.registry.add_root(node);
                } else {
                    self.registry.add_branch(node, key);
                }
                ancestors.push(key, offset);
                offset += 1;
            }

            for (index, raw) in lines.iter().enumerate() {
                let line = index + 1;
                let (whitespace, rest) = split_indent(raw);
                if rest.trim().is_empty() {
                    continue;
                }
                let name = normalize(rest);
                if name.is_empty() {
                    continue;
                }
                if self.registry.contains(&name) {
                    warn!(fragment = key, line, name = %name, "duplicate node");
                    self.registry.record_duplicate(&name);
                    continue;
                }

                let local = self.indentation.level(whitespace_width(whitespace));
                let level = local + offset;
                self.indentation.pin_default();

                // virtual trunk: the first line of the root fragment is the root
                if self.registry.root().is_none() {
                    self.registry
                        .add_root(Node::new(name.as_str(), vec![], level, Some(line)));
                    ancestors.push(name, level);
                    continue;
                }

                if self.pending.contains_key(&name) {
                    ancestors.realign(level);
                    debug!(from = key, to = %name, line, level, "following fragment link");
                    self.consume(&name, ancestors.clone(), local);
                    continue;
                }

                ancestors.realign(level);
                if ancestors.is_empty() {
                    warn!(fragment = key, line, name = %name, "line has no parent");
                    self.detached.push(name);
                    continue;
                }
                let node = Node::new(name.as_str(), ancestors.names(), level, Some(line));
                if self.registry.add_branch(node, key) == Insertion::Added {
                    ancestors.push(name, level);
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn children(tree: &Tree, name: &str) -> Vec<String> {
            tree.get(name).expect("node").children.clone()
        }

        fn ancestors(tree: &Tree, name: &str) -> Vec<String> {
            tree.get(name).expect("node").ancestors.clone()
        }

        fn assert_well_formed(tree: &Tree) {
            let mut seen = std::collections::HashSet::new();
            for node in tree.nodes() {
                assert!(seen.insert(node.text.clone()), "duplicate {}", node.text);
                match node.parent() {
                    Some(parent) => {
                        assert!(children(tree, parent).contains(&node.text));
                        for a in &node.ancestors {
                            assert!(tree.get(a).is_some(), "missing ancestor {a}");
                        }
                        assert_eq!(node.ancestors.first().map(String::as_str), tree.root());
                    }
                    None => assert_eq!(Some(node.text.as_str()), tree.root()),
                }
            }
        }

        fn scenario_a() -> Tree {
            Tree::from_fragments(
                [
                    ("root", "- [[an-entry]]\n- [[i.another-branch]]\n"),
                    ("an-entry", "- [[a-post]]\n- missing\n"),
                ],
                "root",
                BuildOptions::default(),
            )
            .expect("build")
        }

        #[test]
        fn linked_fragments_stitch_into_one_tree() {
            let tree = scenario_a();
            assert_eq!(children(&tree, "root"), vec!["an-entry", "i.another-branch"]);
            assert_eq!(ancestors(&tree, "an-entry"), vec!["root"]);
            assert_eq!(children(&tree, "an-entry"), vec!["a-post", "missing"]);
            assert_eq!(ancestors(&tree, "a-post"), vec!["root", "an-entry"]);
            assert!(children(&tree, "a-post").is_empty());

            let missing = tree.get("missing").expect("missing");
            assert!(missing.is_zombie());
            assert!(missing.children.is_empty());
            assert_eq!(missing.id(), "missing");
            assert_eq!(missing.kind(), "zombie");

            assert!(tree.unconsumed_fragments().is_empty());
            assert_well_formed(&tree);
        }

        #[test]
        fn trunk_nodes_record_owner_level_and_no_line() {
            let tree = scenario_a();
            let root = tree.root_node().expect("root");
            assert!(root.ancestors.is_empty());
            assert_eq!(root.level, 0);
            assert_eq!(root.line, None);

            let entry = tree.get("an-entry").expect("entry");
            assert_eq!((entry.level, entry.line), (1, None));
            assert_eq!(tree.get("missing").unwrap().line, Some(2));
            assert_eq!(tree.trunk_of("a-post"), Some("an-entry"));
            assert_eq!(tree.trunk_of("i.another-branch"), Some("root"));
            assert_eq!(tree.trunk_of("an-entry"), Some("an-entry"));
        }

        #[test]
        fn duplicate_names_fail_the_build() {
            let err = Tree::from_outline("- a\n- b\n  - [[a]]\n- a\n", BuildOptions::default())
                .expect_err("duplicates");
            assert_eq!(
                err,
                TreeError::DuplicateNodes {
                    names: vec!["a".into()]
                }
            );
            assert_eq!(
                err.to_string(),
                "Tree did not build, duplicate nodes found:\n\na\n"
            );
        }

        #[test]
        fn missing_root_fragment_lists_keys() {
            let err = Tree::from_fragments(
                [("x", "- a"), ("y", "- b")],
                "i.bonsai",
                BuildOptions::default(),
            )
            .expect_err("missing root");
            assert_eq!(
                err,
                TreeError::MissingRootFragment {
                    root: "i.bonsai".into(),
                    available: vec!["x".into(), "y".into()],
                }
            );
            assert!(err.to_string().contains("keys are: x, y"));
        }

        #[test]
        fn unreached_fragments_are_reported_not_fatal() {
            let tree = Tree::from_fragments(
                [("root", "- a\n"), ("orphan-index", "- z\n")],
                "root",
                BuildOptions::default(),
            )
            .expect("build");
            assert_eq!(tree.unconsumed_fragments(), ["orphan-index"]);
            assert_eq!(
                tree.completeness_warning().as_deref(),
                Some("Some files were not processed: orphan-index")
            );
            assert!(tree.get("a").is_some());
            assert!(tree.get("z").is_none());
        }

        #[test]
        fn single_outline_uses_synthetic_root() {
            let tree = Tree::from_outline("a\n\tb\n\t\tc\nd\n", BuildOptions::default())
                .expect("build");
            assert_eq!(tree.root(), Some(SINGLE_OUTLINE_KEY));
            assert_eq!(tree.chunk_size(), Some(4));
            assert_eq!(tree.level_max(), 3);
            assert_eq!(children(&tree, "root"), vec!["a", "d"]);
            assert_eq!(ancestors(&tree, "c"), vec!["root", "a", "b"]);
            assert_eq!(tree.get("c").unwrap().level, 4);
            assert_well_formed(&tree);
        }

        #[test]
        fn virtual_trunk_roots_at_first_line() {
            let tree = Tree::from_fragments(
                [
                    ("i.bonsai", "- [[root-note]]\n  - [[i.topic]]\n  - [[plain]]\n"),
                    ("i.topic", "- [[topic-entry]]\n  - [[topic-child]]\n"),
                ],
                "i.bonsai",
                BuildOptions {
                    virtual_trunk: true,
                },
            )
            .expect("build");
            assert_eq!(tree.root(), Some("root-note"));
            assert!(tree.get("i.bonsai").is_none());
            assert!(tree.get("i.topic").is_none());
            assert_eq!(children(&tree, "root-note"), vec!["topic-entry", "plain"]);
            assert_eq!(ancestors(&tree, "topic-child"), vec!["root-note", "topic-entry"]);
            assert_eq!(tree.trunk_of("topic-entry"), Some("i.topic"));
            assert_eq!(tree.root_node().unwrap().line, Some(1));
            assert_well_formed(&tree);
        }

        #[test]
        fn nested_links_and_upward_jumps() {
            let tree = Tree::from_fragments(
                [
                    ("root", "- top\n  - [[mid]]\n  - after-mid\n- last\n"),
                    ("mid", "- m1\n  - m1a\n    - m1b\n- m2\n"),
                ],
                "root",
                BuildOptions::default(),
            )
            .expect("build");
            assert_eq!(children(&tree, "root"), vec!["top", "last"]);
            assert_eq!(children(&tree, "top"), vec!["mid", "after-mid"]);
            assert_eq!(children(&tree, "mid"), vec!["m1", "m2"]);
            assert_eq!(ancestors(&tree, "m1b"), vec!["root", "top", "mid", "m1", "m1a"]);
            assert_eq!(ancestors(&tree, "m2"), vec!["root", "top", "mid"]);
            assert_well_formed(&tree);
        }

        #[test]
        fn sibling_branches_do_not_share_ancestry() {
            let tree = Tree::from_fragments(
                [
                    ("root", "- [[left]]\n- [[right]]\n"),
                    ("left", "- l1\n  - l2\n"),
                    ("right", "- r1\n"),
                ],
                "root",
                BuildOptions::default(),
            )
            .expect("build");
            assert_eq!(ancestors(&tree, "r1"), vec!["root", "right"]);
            assert_eq!(ancestors(&tree, "right"), vec!["root"]);
            assert_eq!(children(&tree, "root"), vec!["left", "right"]);
            assert_well_formed(&tree);
        }

        #[test]
        fn cyclic_link_is_a_plain_line() {
            let err = Tree::from_fragments(
                [("root", "- [[a]]"), ("a", "- [[b]]"), ("b", "- [[a]]")],
                "root",
                BuildOptions::default(),
            )
            .expect_err("cycle duplicates the trunk");
            assert_eq!(err, TreeError::DuplicateNodes { names: vec!["a".into()] });

            let tree = Tree::from_fragments(
                [("root", "- top\n  - [[a]]"), ("a", "- [[b]]"), ("b", "- [[a]]")],
                "root",
                BuildOptions {
                    virtual_trunk: true,
                },
            )
            .expect("virtual build");
            assert!(tree.get("a").is_some());
            assert!(tree.get("b").is_none());
            assert_eq!(tree.trunk_of("a"), Some("b"));
        }

        #[test]
        fn second_top_level_line_in_virtual_mode_is_detached() {
            let err = Tree::from_outline(
                "- first\n- second\n",
                BuildOptions {
                    virtual_trunk: true,
                },
            )
            .expect_err("detached");
            assert_eq!(
                err,
                TreeError::DetachedNodes {
                    names: vec!["second".into()]
                }
            );
        }

        #[test]
        fn over_indented_line_does_not_detach_its_successor() {
            let outline = "- a\n  - b\n        - x\n  - y\n";
            let tree = Tree::from_outline(outline, BuildOptions::default()).expect("build");
            assert_eq!(children(&tree, "a"), vec!["b", "y"]);
            assert_eq!(ancestors(&tree, "x"), vec!["root", "a", "b"]);
            assert_eq!(ancestors(&tree, "y"), vec!["root", "a"]);
            assert_well_formed(&tree);
        }

        #[test]
        fn blank_and_marker_only_lines_are_skipped() {
            let tree = Tree::from_outline("- a\n\n   \n- \n- b\n", BuildOptions::default())
                .expect("build");
            assert_eq!(children(&tree, "root"), vec!["a", "b"]);
            assert_eq!(tree.get("b").unwrap().line, Some(5));
        }

        #[test]
        fn attach_document_resolves_zombie() {
            let mut tree = scenario_a();
            let doc = Document {
                name: "a-post".into(),
                url: "/2023/09/18/post/".into(),
                title: Some("A Post".into()),
                kind: "posts".into(),
            };
            assert!(tree.attach_document("a-post", doc));
            let stray = Document {
                name: "nope".into(),
                url: "/nope/".into(),
                title: None,
                kind: "entries".into(),
            };
            assert!(!tree.attach_document("nope", stray));
            let node = tree.get("a-post").unwrap();
            assert!(!node.is_zombie());
            assert_eq!(node.url(), "/2023/09/18/post/");
            assert_eq!(node.title(), "A Post");
            assert_eq!(node.kind(), "posts");
            assert_eq!(tree.map_entries()[2].url, "/2023/09/18/post/");
        }
    }
}

pub mod query {
    //! Read-only structural queries over a finished [`Tree`].

    use crate::builder::Tree;
    use crate::model::{Lineage, Node, TreeError};

    impl Tree {
        pub fn is_known(&self, name: &str) -> bool {
            self.registry.contains(name)
        }

        /// Ancestor and child names of `name`.
        pub fn ancestors_and_children_of(
            &self,
            name: &str,
        ) -> Result<(&[String], &[String]), TreeError> {
            self.get(name)
                .map(|node| (node.ancestors.as_slice(), node.children.as_slice()))
                .ok_or_else(|| TreeError::UnknownNode(name.to_string()))
        }

        /// Root-to-parent identifiers and all descendant identifiers of `target`
        /// (matched by identifier or text). Descendants are listed depth first.
        pub fn lineage_of(&self, target: &str) -> Option<Lineage> {
            let mut path = Vec::new();
            self.find_lineage(target, self.root_node()?, &mut path)
        }

        fn find_lineage(
            &self,
            target: &str,
            node: &Node,
            path: &mut Vec<String>,
        ) -> Option<Lineage> {
            if node.matches(target) {
                let mut descendants = Vec::new();
                self.collect_descendants(node, &mut descendants);
                return Some(Lineage {
                    ancestors: path.clone(),
                    descendants,
                });
            }
            path.push(node.id().to_string());
            for child in self.child_nodes(node) {
                if let Some(found) = self.find_lineage(target, child, path) {
                    return Some(found);
                }
            }
            path.pop();
            None
        }

        fn collect_descendants(&self, node: &Node, out: &mut Vec<String>) {
            for child in self.child_nodes(node) {
                out.push(child.id().to_string());
                self.collect_descendants(child, out);
            }
        }

        /// Identifiers of the children of the target's parent, target included.
        ///
        /// Only targets sitting directly under the root resolve; deeper targets and the
        /// root itself yield an empty list. Hosts currently depend on that.
        // TODO: resolve siblings of deeper targets.
        pub fn sibling_ids_of(&self, target: &str) -> Vec<String> {
            let Some(root) = self.root_node() else {
                return vec![];
            };
            if self.child_nodes(root).any(|child| child.matches(target)) {
                self.child_nodes(root).map(|c| c.id().to_string()).collect()
            } else {
                vec![]
            }
        }

        fn child_nodes<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
            node.children.iter().filter_map(|c| self.get(c))
        }
    }

}

pub mod format {
    use crate::builder::Tree;
    use std::fmt::Write;
    use tracing::warn;

    /// Boxed textual dump of the tree from its root, one node per line.
    pub fn format_tree(tree: &Tree) -> String {
        let mut out = String::new();
        if let Some(root) = tree.root() {
            render_subtree(tree, root, "", &mut out);
        }
        out
    }

    fn render_subtree(tree: &Tree, name: &str, prefix: &str, out: &mut String) {
        let _ = writeln!(out, "{name}");
        let Some(node) = tree.get(name) else {
            warn!(name, "no node for name while rendering");
            return;
        };
        let last = node.children.len().saturating_sub(1);
        for (index, child) in node.children.iter().enumerate() {
            let (branch, indent) = if index == last {
                ("└── ", "    ")
            } else {
                ("├── ", "|   ")
            };
            out.push_str(prefix);
            out.push_str(branch);
            render_subtree(tree, child, &format!("{prefix}{indent}"), out);
        }
    }

    /// One `Display` line per node in creation order.
    pub fn format_nodes(tree: &Tree) -> String {
        let mut out = String::from("# Tree Nodes:\n");
        for node in tree.nodes() {
            let _ = writeln!(out, "# {node}");
        }
        out
    }

    impl Tree {
        pub fn render_as_text(&self) -> String {
            format_tree(self)
        }
    }

}

pub mod site {
    //! Host adapter: wires caller-supplied documents and configuration into a build and
    //! derives per-document metadata. Documents arrive fully formed; nothing here reads
    //! files or computes urls.

    use crate::builder::Tree;
    use crate::model::{BuildOptions, Document, MapEntry, TreeError};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use tracing::{debug, error, warn};

    /// Key of the semtree section in a site configuration.
    pub const CONFIG_KEY: &str = "semtree";

    /// Documents of this kind must all appear in the tree.
    pub const ENTRIES_KIND: &str = "entries";

    pub const MARKDOWN_EXTENSIONS: [&str; 5] = ["md", "markdown", "mkdown", "mkdn", "mkd"];

    pub fn is_markdown_extension(extension: &str) -> bool {
        let ext = extension.trim_start_matches('.');
        MARKDOWN_EXTENSIONS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(ext))
    }

    /* ---------------------------- Configuration ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SemTreeConfig {
        pub enabled: bool,
        /// Document kinds to leave out.
        pub exclude: Vec<String>,
        /// Kind of the trunk (index) documents.
        pub doctype: String,
        /// Page that receives the full node list.
        pub map: String,
        pub root: String,
        pub virtual_trunk: bool,
    }

    impl Default for SemTreeConfig {
        fn default() -> Self {
            Self {
                enabled: true,
                exclude: vec![],
                doctype: "index".into(),
                map: "map".into(),
                root: "i.bonsai".into(),
                virtual_trunk: false,
            }
        }
    }

    impl SemTreeConfig {
        /// Read the `semtree` section of a site configuration; absent means defaults.
        pub fn from_site_config(site: &serde_json::Value) -> Result<Self, serde_json::Error> {
            match site.get(CONFIG_KEY) {
                Some(section) => Self::deserialize(section),
                None => Ok(Self::default()),
            }
        }

        pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
            serde_json::from_str(s)
        }

        pub fn is_excluded(&self, kind: &str) -> bool {
            self.exclude.iter().any(|k| k == kind)
        }

        pub fn build_options(&self) -> BuildOptions {
            BuildOptions {
                virtual_trunk: self.virtual_trunk,
            }
        }
    }

    /* ------------------------------ Documents ------------------------------ */

    /// A content item as the host knows it.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SiteDocument {
        /// File stem; this is what outlines refer to.
        pub name: String,
        pub url: String,
        pub kind: String,
        #[serde(default)]
        pub title: Option<String>,
        #[serde(default = "SiteDocument::default_extension")]
        pub extension: String,
        /// Body without front matter.
        #[serde(default)]
        pub content: String,
    }

    impl SiteDocument {
        pub fn new(
            name: impl Into<String>,
            kind: impl Into<String>,
            url: impl Into<String>,
        ) -> Self {
            Self {
                name: name.into(),
                url: url.into(),
                kind: kind.into(),
                title: None,
                extension: Self::default_extension(),
                content: String::new(),
            }
        }

        pub fn with_content(mut self, content: impl Into<String>) -> Self {
            self.content = content.into();
            self
        }

        pub fn with_title(mut self, title: impl Into<String>) -> Self {
            self.title = Some(title.into());
            self
        }

        pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
            self.extension = extension.into();
            self
        }

        pub fn document(&self) -> Document {
            Document {
                name: self.name.clone(),
                url: self.url.clone(),
                title: self.title.clone(),
                kind: self.kind.clone(),
            }
        }

        fn default_extension() -> String {
            "md".into()
        }
    }

    /* ------------------------------ Advisories ------------------------------ */

    /// Non-fatal findings reported to the host.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Advisory {
        NoDocuments,
        NoRootDocument { root: String },
        NoTrunk { doctype: String },
        BuildFailed(String),
        Incomplete { fragments: Vec<String> },
        Dangling { names: Vec<String> },
    }

    impl fmt::Display for Advisory {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Advisory::NoDocuments => write!(f, "No semtree files to process."),
                Advisory::NoRootDocument { root } => {
                    write!(f, "No root doc detected (looked for '{root}').")
                }
                Advisory::NoTrunk { doctype } => {
                    write!(f, "No trunk (index docs) detected for doctype '{doctype}'.")
                }
                Advisory::BuildFailed(message) => write!(f, "{}", message.trim_end()),
                Advisory::Incomplete { fragments } => {
                    write!(f, "Some files were not processed: {}", fragments.join(", "))
                }
                Advisory::Dangling { names } => {
                    write!(f, "entries not listed in the tree: {}", names.join(", "))
                }
            }
        }
    }

    /* ------------------------------- Output ------------------------------- */

    /// Ancestor and child urls for one document (names where no document exists).
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct DocMetadata {
        pub ancestors: Vec<String>,
        pub children: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MapPage {
        pub name: String,
        pub nodes: Vec<MapEntry>,
    }

    #[derive(Debug, Clone)]
    pub struct SiteTree {
        pub tree: Tree,
        /// Document name → metadata, for every document matched to a node.
        pub metadata: IndexMap<String, DocMetadata>,
        pub map_page: Option<MapPage>,
        pub advisories: Vec<Advisory>,
    }

    /* ------------------------------ Public API ------------------------------ */

    /// Build the tree for a site. `Ok(None)` when disabled.
    ///
    /// Only a missing root fragment is an error; everything else is an [`Advisory`].
    pub fn generate(
        config: &SemTreeConfig,
        documents: &[SiteDocument],
    ) -> Result<Option<SiteTree>, TreeError> {
        if !config.enabled {
            debug!("semtree disabled");
            return Ok(None);
        }
        let mut advisories = Vec::new();

        let docs: Vec<&SiteDocument> = documents
            .iter()
            .filter(|d| is_markdown_extension(&d.extension) && !config.is_excluded(&d.kind))
            .collect();
        if docs.is_empty() {
            advise(&mut advisories, Advisory::NoDocuments);
        }
        if !docs.iter().any(|d| d.name == config.root) {
            advise(
                &mut advisories,
                Advisory::NoRootDocument {
                    root: config.root.clone(),
                },
            );
        }

        let fragments: IndexMap<&str, &str> = documents
            .iter()
            .filter(|d| d.kind == config.doctype)
            .map(|d| (d.name.as_str(), d.content.as_str()))
            .collect();
        if fragments.is_empty() {
            advise(
                &mut advisories,
                Advisory::NoTrunk {
                    doctype: config.doctype.clone(),
                },
            );
        }

        let options = config.build_options();
        let mut tree = match Tree::from_fragments(fragments, &config.root, options) {
            Ok(tree) => tree,
            Err(err @ (TreeError::DuplicateNodes { .. } | TreeError::DetachedNodes { .. })) => {
                error!(%err, "semtree build failed");
                advisories.push(Advisory::BuildFailed(err.to_string()));
                Tree::empty(options)
            }
            Err(err) => return Err(err),
        };
        if !tree.unconsumed_fragments().is_empty() {
            advisories.push(Advisory::Incomplete {
                fragments: tree.unconsumed_fragments().to_vec(),
            });
        }

        // first document wins when names collide across collections
        let mut by_name: IndexMap<&str, &SiteDocument> = IndexMap::new();
        for doc in &docs {
            by_name.entry(doc.name.as_str()).or_insert(*doc);
        }

        let names: Vec<String> = tree.nodes().map(|n| n.text.clone()).collect();
        let mut metadata = IndexMap::new();
        for name in names {
            let Some(doc) = by_name.get(name.as_str()) else {
                continue;
            };
            tree.attach_document(&name, doc.document());
            let (ancestors, children) = tree.ancestors_and_children_of(&name)?;
            metadata.insert(
                doc.name.clone(),
                DocMetadata {
                    ancestors: names_to_urls(&by_name, ancestors),
                    children: names_to_urls(&by_name, children),
                },
            );
        }

        let map_page = by_name.get(config.map.as_str()).map(|doc| MapPage {
            name: doc.name.clone(),
            nodes: tree.map_entries(),
        });

        let dangling: Vec<String> = documents
            .iter()
            .filter(|d| d.kind == ENTRIES_KIND && !tree.is_known(&d.name))
            .map(|d| d.name.clone())
            .collect();
        if !dangling.is_empty() {
            advise(&mut advisories, Advisory::Dangling { names: dangling });
        }

        Ok(Some(SiteTree {
            tree,
            metadata,
            map_page,
            advisories,
        }))
    }

    /* ------------------------------ Internals ------------------------------ */

    fn advise(advisories: &mut Vec<Advisory>, advisory: Advisory) {
        warn!("{advisory}");
        advisories.push(advisory);
    }

    fn names_to_urls(by_name: &IndexMap<&str, &SiteDocument>, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|name| match by_name.get(name.as_str()) {
                Some(doc) => doc.url.clone(),
                None => name.clone(),
            })
            .collect()
    }

}

pub use builder::{SINGLE_OUTLINE_KEY, Tree};
pub use format::format_tree;
pub use model::{Backing, BuildOptions, Document, Lineage, MapEntry, Node, TreeError};
