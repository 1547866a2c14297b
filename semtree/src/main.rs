use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use semtree::site::{SemTreeConfig, is_markdown_extension};
use semtree::{BuildOptions, Tree, format::format_nodes};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "semtree",
    about = "Build and query semantic trees from markdown outlines",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the tree and print it.
    Tree(TreeArgs),

    /// Print the ancestors and children of one node.
    Show(ShowArgs),

    /// Print the ancestor path and descendants of a node.
    Lineage(LineageArgs),

    /// Print the identifiers of a node and its siblings.
    Siblings(SiblingsArgs),

    /// Fail if any of the given names is missing from the tree.
    Known(KnownArgs),
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Markdown fragments or directories containing them. Each file stem is a fragment key.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Fragment key to start from. Defaults to the file stem when a single file is given.
    #[arg(long)]
    root: Option<String>,
    /// Treat fragments as link-only connectors instead of nodes.
    #[arg(long)]
    virtual_trunk: bool,
    /// JSON site configuration; its `semtree` section supplies root and trunk mode.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TreeArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Emit JSON instead of the boxed text view.
    #[arg(long)]
    json: bool,
    /// List nodes in creation order instead of drawing the tree.
    #[arg(long)]
    nodes: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Node name.
    name: String,
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Args)]
struct LineageArgs {
    /// Node identifier or name.
    id: String,
    #[command(flatten)]
    source: SourceArgs,
    /// Emit JSON instead of plain lists.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SiblingsArgs {
    /// Node identifier or name.
    id: String,
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Args)]
struct KnownArgs {
    /// Names to look up; repeat for several.
    #[arg(long = "name", required = true)]
    names: Vec<String>,
    #[command(flatten)]
    source: SourceArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Tree(args) => handle_tree(args),
        Commands::Show(args) => handle_show(args),
        Commands::Lineage(args) => handle_lineage(args),
        Commands::Siblings(args) => handle_siblings(args),
        Commands::Known(args) => handle_known(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("semtree=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_tree(args: TreeArgs) -> Result<()> {
    let TreeArgs { source, json, nodes } = args;
    let tree = load_tree(&source)?;

    match (json, nodes) {
        (true, true) => {
            let all: Vec<_> = tree.nodes().collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        (true, false) => {
            println!("{}", serde_json::to_string_pretty(&tree.map_entries())?);
        }
        (false, true) => print!("{}", format_nodes(&tree)),
        (false, false) => print!("{}", tree.render_as_text()),
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<()> {
    let tree = load_tree(&args.source)?;
    let (ancestors, children) = tree.ancestors_and_children_of(&args.name)?;
    println!("ancestors: {}", ancestors.join(", "));
    println!("children: {}", children.join(", "));
    Ok(())
}

fn handle_lineage(args: LineageArgs) -> Result<()> {
    let LineageArgs { id, source, json } = args;
    let tree = load_tree(&source)?;
    let lineage = tree
        .lineage_of(&id)
        .with_context(|| format!("'{id}' is not in the tree"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lineage)?);
    } else {
        println!("ancestors: {}", lineage.ancestors.join(", "));
        println!("descendants: {}", lineage.descendants.join(", "));
    }
    Ok(())
}

fn handle_siblings(args: SiblingsArgs) -> Result<()> {
    let tree = load_tree(&args.source)?;
    let siblings = tree.sibling_ids_of(&args.id);
    if siblings.is_empty() {
        eprintln!("No siblings found for '{}'.", args.id);
    }
    for id in siblings {
        println!("{id}");
    }
    Ok(())
}

fn handle_known(args: KnownArgs) -> Result<()> {
    let tree = load_tree(&args.source)?;
    let missing: Vec<&String> = args.names.iter().filter(|n| !tree.is_known(n)).collect();
    for name in &missing {
        println!("{name}");
    }
    if !missing.is_empty() {
        anyhow::bail!("{} name(s) are not in the tree", missing.len());
    }
    Ok(())
}

fn load_tree(source: &SourceArgs) -> Result<Tree> {
    let files = expand_inputs(&source.inputs)?;
    if files.is_empty() {
        anyhow::bail!("no markdown fragments found in the provided inputs");
    }

    let config = match &source.config {
        Some(path) => Some(read_config(path)?),
        None => None,
    };

    let mut fragments = IndexMap::new();
    for path in &files {
        let key = fragment_key(path)?;
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        debug!(key = %key, path = ?path, "loaded fragment");
        if fragments
            .insert(key.clone(), strip_front_matter(&text).to_string())
            .is_some()
        {
            anyhow::bail!("fragment key '{key}' is provided by more than one file");
        }
    }

    let root = match (&source.root, &config, files.as_slice()) {
        (Some(root), _, _) => root.clone(),
        (None, Some(config), _) => config.root.clone(),
        (None, None, [only]) => fragment_key(only)?,
        (None, None, _) => anyhow::bail!("--root is required when more than one fragment is given"),
    };
    let options = BuildOptions {
        virtual_trunk: source.virtual_trunk || config.is_some_and(|c| c.virtual_trunk),
    };

    Ok(Tree::from_fragments(fragments, &root, options)?)
}

fn read_config(path: &Path) -> Result<SemTreeConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
    let site: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
    SemTreeConfig::from_site_config(&site)
        .with_context(|| format!("reading semtree section of {:?}", path))
}

fn fragment_key(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .with_context(|| format!("{:?} has no usable file name", path))
}

/// Drop a leading `---` front matter block.
fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return &rest[offset..];
        }
    }
    text
}

fn has_markdown_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(is_markdown_extension)
        .unwrap_or(false)
}

fn collect_markdown_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(root, &mut out, &mut visited)?;
    out.sort();
    Ok(out)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!(dir = ?canonical, "scanning directory");
            for file in collect_markdown_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !has_markdown_extension(&canonical) {
                anyhow::bail!("{:?} is not a markdown file", canonical);
            }
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && has_markdown_extension(&canonical) {
        out.push(canonical);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn source(inputs: Vec<PathBuf>, root: Option<&str>) -> SourceArgs {
        SourceArgs {
            inputs,
            root: root.map(str::to_string),
            virtual_trunk: false,
            config: None,
        }
    }

    #[test]
    fn front_matter_is_stripped() {
        let text = "---\ntitle: Bonsai\n---\n- [[an-entry]]\n";
        assert_eq!(strip_front_matter(text), "- [[an-entry]]\n");
        assert_eq!(strip_front_matter("- plain\n"), "- plain\n");
        assert_eq!(strip_front_matter("---\nunterminated\n"), "---\nunterminated\n");
    }

    #[test]
    fn expand_inputs_walks_directories_for_markdown() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("index");
        fs::create_dir_all(&nested).expect("mkdir index");
        fs::write(tmp.path().join("i.bonsai.md"), "- a").expect("write root");
        fs::write(nested.join("i.branch.markdown"), "- b").expect("write branch");
        fs::write(nested.join("notes.txt"), "ignored").expect("write txt");

        let files = expand_inputs(&[tmp.path().to_path_buf()]).expect("expand");
        let names: Vec<String> = files
            .iter()
            .map(|p| fragment_key(p).expect("key"))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"i.bonsai".to_string()));
        assert!(names.contains(&"i.branch".to_string()));
    }

    #[test]
    fn expand_inputs_rejects_other_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("outline.txt");
        fs::write(&file, "- a").expect("write");
        assert!(expand_inputs(&[file]).is_err());
    }

    #[test]
    fn single_file_roots_at_its_stem() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("i.bonsai.md");
        fs::write(&file, "---\ntitle: x\n---\n- [[an-entry]]\n  - a-post\n").expect("write");

        let tree = load_tree(&source(vec![file], None)).expect("tree");
        assert_eq!(tree.root(), Some("i.bonsai"));
        assert_eq!(
            tree.get("a-post").expect("post").ancestors,
            vec!["i.bonsai", "an-entry"]
        );
    }

    #[test]
    fn several_files_need_a_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("i.bonsai.md"), "- [[an-entry]]\n").expect("write root");
        fs::write(tmp.path().join("an-entry.md"), "- a-post\n").expect("write entry");

        let dir = vec![tmp.path().to_path_buf()];
        assert!(load_tree(&source(dir.clone(), None)).is_err());

        let tree = load_tree(&source(dir, Some("i.bonsai"))).expect("tree");
        assert_eq!(tree.render_as_text(), "i.bonsai\n└── an-entry\n    └── a-post\n");
    }

    #[test]
    fn config_supplies_root_and_trunk_mode() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("i.garden.md"), "- top\n  - [[i.leaf]]\n").expect("write root");
        fs::write(tmp.path().join("i.leaf.md"), "- leaf-note\n").expect("write leaf");
        let config = tmp.path().join("site.json");
        fs::write(&config, r#"{"semtree": {"root": "i.garden", "virtual_trunk": true}}"#)
            .expect("write config");

        let mut args = source(vec![tmp.path().to_path_buf()], None);
        args.config = Some(config);
        let tree = load_tree(&args).expect("tree");
        assert_eq!(tree.root(), Some("top"));
        assert!(!tree.is_known("i.leaf"));
        assert_eq!(tree.get("leaf-note").expect("leaf").ancestors, vec!["top"]);
    }
}
