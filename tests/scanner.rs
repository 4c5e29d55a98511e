use ccgraph::core::{
    AnalysisStatus, DiagnosticKind, EntryPointScorer, FileScanner, PriorityScorer,
    ProjectMetadata,
};
use ccgraph::parsers::Language;
use ccgraph::{build, AnalysisConfig, CcgError, CodebaseAnalyzer, SourceEntry, SourceTree};
use std::fs;
use tempfile::TempDir;

fn tree(files: &[(&str, &str)]) -> SourceTree {
    SourceTree::from_entries(
        files
            .iter()
            .map(|(path, content)| SourceEntry::new(*path, *content))
            .collect(),
    )
}

fn paths(tree: &SourceTree, config: &AnalysisConfig) -> Vec<String> {
    FileScanner::new(config, &EntryPointScorer)
        .discover(tree)
        .unwrap()
        .candidates
        .into_iter()
        .map(|c| c.path)
        .collect()
}

#[test]
fn directory_walk_prunes_ignored_and_hidden_dirs() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    for dir in ["src", "node_modules/left-pad", ".git/hooks", "pkg/__pycache__"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    fs::write(root.join("src/app.py"), "def run():\n    pass\n").unwrap();
    fs::write(root.join("node_modules/left-pad/index.js"), "function pad() {}\n").unwrap();
    fs::write(root.join(".git/hooks/pre_commit.py"), "print('x')\n").unwrap();
    fs::write(root.join("pkg/__pycache__/mod.py"), "x = 1\n").unwrap();
    fs::write(root.join("pkg/mod.py"), "x = 1\n").unwrap();
    fs::write(root.join("README.md"), "# readme\n").unwrap();

    let tree = SourceTree::from_directory(root, &AnalysisConfig::default()).unwrap();
    let walked: Vec<&str> = tree.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(walked, vec!["README.md", "pkg/mod.py", "src/app.py"]);

    let readme = &tree.entries()[0];
    assert!(readme.content.is_empty(), "non-source files are not read");
    assert_eq!(readme.size, 9);
}

#[test]
fn analyze_directory_builds_from_disk() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("app")).unwrap();
    fs::write(
        temp.path().join("app/main.py"),
        "from app.util import helper\n\ndef main():\n    helper()\n",
    )
    .unwrap();
    fs::write(temp.path().join("app/util.py"), "def helper():\n    pass\n").unwrap();

    let analyzer = CodebaseAnalyzer::new(AnalysisConfig::default().with_concurrency(2)).unwrap();
    let (graph, diagnostics) = analyzer.analyze_directory(temp.path()).unwrap();

    assert_eq!(graph.status(), AnalysisStatus::Complete);
    assert!(graph.find("app/main.py::main").is_some());
    assert!(graph.find("app/util.py::helper").is_some());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics.entries());
}

#[test]
fn missing_directory_is_a_discovery_error() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope");
    let err = SourceTree::from_directory(&missing, &AnalysisConfig::default()).unwrap_err();
    assert!(matches!(err, CcgError::Discovery(_)));
}

#[test]
fn file_cap_keeps_highest_ranked_files() {
    let files = tree(&[
        ("a.py", "def a():\n    pass\n"),
        ("pkg/util.py", "def util():\n    pass\n"),
        ("tests/test_a.py", "def test_a():\n    pass\n"),
        ("pkg/__init__.py", "VERSION = 1\n"),
        ("main.py", "def main():\n    pass\n"),
    ]);
    let config = AnalysisConfig::default().with_max_files(2).with_concurrency(1);

    let discovery = FileScanner::new(&config, &EntryPointScorer)
        .discover(&files)
        .unwrap();
    let kept: Vec<&str> = discovery.candidates.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(kept, vec!["main.py", "pkg/__init__.py"]);
    assert!(discovery.truncated);

    let skipped: Vec<&str> = discovery
        .diagnostics
        .of_kind(DiagnosticKind::BudgetExceeded)
        .filter_map(|d| d.file.as_deref())
        .collect();
    assert_eq!(skipped, vec!["a.py", "pkg/util.py", "tests/test_a.py"]);

    let (graph, diagnostics) = build(&files, &config).unwrap();
    assert!(graph.is_partial());
    assert!(graph.find("a.py").is_none());
    assert_eq!(diagnostics.skipped_files(), vec!["a.py", "pkg/util.py", "tests/test_a.py"]);
}

#[test]
fn ties_break_by_depth_then_path() {
    let files = tree(&[
        ("b/deep/x.py", "x = 1\n"),
        ("b/y.py", "y = 1\n"),
        ("z.py", "z = 1\n"),
        ("a/y.py", "y = 1\n"),
    ]);
    assert_eq!(
        paths(&files, &AnalysisConfig::default()),
        vec!["z.py", "a/y.py", "b/y.py", "b/deep/x.py"]
    );
}

#[test]
fn declared_entry_point_ranks_first() {
    let files = tree(&[
        ("main.py", "def main():\n    pass\n"),
        ("tool/cli.py", "def main():\n    pass\n"),
        (
            "pyproject.toml",
            "[project]\nname = \"tool\"\n\n[project.scripts]\ntool = \"tool.cli:main\"\n",
        ),
    ]);
    assert!(files.metadata().declares("tool/cli.py"));
    assert_eq!(
        paths(&files, &AnalysisConfig::default()),
        vec!["tool/cli.py", "main.py"]
    );
}

#[test]
fn package_json_entry_points_are_detected() {
    let entries = vec![SourceEntry::new(
        "web/package.json",
        r#"{"name": "web", "main": "src/index.js", "bin": {"web": "./bin/cli.js"}}"#,
    )];
    let metadata = ProjectMetadata::detect(&entries);
    assert!(metadata.declares("web/src/index.js"));
    assert!(metadata.declares("web/bin/cli.js"));
}

#[test]
fn oversize_and_binary_files_are_excluded_with_diagnostics() {
    let files = SourceTree::from_entries(vec![
        SourceEntry::new("ok.py", "def ok():\n    pass\n"),
        SourceEntry::unread("huge.py", 5_000_000),
        SourceEntry::new("blob.py", vec![0u8, 159, 146, 150]),
    ]);
    let config = AnalysisConfig::default();
    let discovery = FileScanner::new(&config, &EntryPointScorer)
        .discover(&files)
        .unwrap();

    assert_eq!(discovery.candidates.len(), 1);
    let excluded: Vec<(&str, &str)> = discovery
        .diagnostics
        .of_kind(DiagnosticKind::FileExcluded)
        .map(|d| (d.file.as_deref().unwrap_or(""), d.message.as_str()))
        .collect();
    assert_eq!(excluded.len(), 2);
    assert_eq!(excluded[0].0, "huge.py");
    assert_eq!(excluded[1], ("blob.py", "binary content"));
    assert!(!discovery.truncated);
}

#[test]
fn disabled_languages_and_ignored_paths_are_silently_skipped() {
    let files = tree(&[
        ("app.py", "def run():\n    pass\n"),
        ("web/app.js", "function run() {}\n"),
        ("node_modules/dep/index.py", "def dep():\n    pass\n"),
    ]);
    let config = AnalysisConfig::default().with_languages(vec![Language::Python]);
    let discovery = FileScanner::new(&config, &EntryPointScorer)
        .discover(&files)
        .unwrap();

    let kept: Vec<&str> = discovery.candidates.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(kept, vec!["app.py"]);
    assert!(discovery.diagnostics.is_empty());
}

#[test]
fn no_eligible_files_is_a_discovery_error() {
    let files = tree(&[("notes.txt", "hello"), ("logo.svg", "<svg/>")]);
    let err = build(&files, &AnalysisConfig::default()).unwrap_err();
    assert!(matches!(err, CcgError::Discovery(_)));

    let err = build(&SourceTree::default(), &AnalysisConfig::default()).unwrap_err();
    assert!(matches!(err, CcgError::Discovery(_)));
}

#[test]
fn all_files_failing_is_no_entities() {
    let files = tree(&[("a.py", "def a(:\n"), ("b.py", "class (:\n")]);
    let err = build(&files, &AnalysisConfig::default().with_concurrency(2)).unwrap_err();
    assert!(matches!(err, CcgError::NoEntities));
}

struct PreferUtilities;

impl PriorityScorer for PreferUtilities {
    fn score(&self, path: &str, _metadata: &ProjectMetadata) -> i64 {
        if path.contains("util") {
            10
        } else {
            0
        }
    }
}

#[test]
fn custom_scorer_changes_what_survives_the_cap() {
    let files = tree(&[
        ("main.py", "def main():\n    pass\n"),
        ("util.py", "def helper():\n    pass\n"),
    ]);
    let analyzer = CodebaseAnalyzer::new(AnalysisConfig::default().with_max_files(1))
        .unwrap()
        .with_scorer(PreferUtilities);
    let (graph, _) = analyzer.analyze(&files).unwrap();
    assert!(graph.find("util.py::helper").is_some());
    assert!(graph.find("main.py").is_none());
}
