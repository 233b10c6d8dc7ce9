// ABOUTME: Integration tests for the file gateway and project store against an in-memory sandbox filesystem
// ABOUTME: The scripted docker CLI interprets test/find/stat/base64/mkdir/rm/mv calls on a shared map

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pretty_assertions::assert_eq;
use sorobox_config::Settings;
use sorobox_sandbox::test_utils::ScriptedRunner;
use sorobox_sandbox::{
    CommandOutput, CommandSpec, EntryKind, EventBus, EventKind, FileGateway, ProjectStore,
    SandboxError, SandboxManager,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONTAINER: &str = "useralice";
const WS: &str = "/home/developer/workspace";
const PROJECT: &str = "/home/developer/workspace/hello";

#[derive(Default)]
struct FakeFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl FakeFs {
    fn with_project() -> Self {
        let mut fs = FakeFs::default();
        for dir in [WS, PROJECT, "/home/developer/workspace/hello/src"] {
            fs.dirs.insert(dir.to_string());
        }
        fs.files.insert(
            format!("{}/Cargo.toml", PROJECT),
            b"[package]\nname = \"hello\"\n".to_vec(),
        );
        fs.files.insert(
            format!("{}/src/lib.rs", PROJECT),
            b"#![no_std]\n".to_vec(),
        );
        fs
    }
}

/// Command run inside the container: everything after the container name
fn inner(spec: &CommandSpec) -> Vec<String> {
    let argv = spec.argv();
    let at = argv.iter().position(|a| *a == CONTAINER).unwrap_or(argv.len());
    argv[at + 1..].iter().map(|s| s.to_string()).collect()
}

fn status(ok: bool) -> CommandOutput {
    if ok {
        ScriptedRunner::ok("")
    } else {
        ScriptedRunner::fail(1, "")
    }
}

fn sandbox(fs: Arc<Mutex<FakeFs>>) -> (Arc<ScriptedRunner>, Arc<SandboxManager>) {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on(&["{{.State.Running}}"], ScriptedRunner::ok("true"));

    let state = fs.clone();
    runner.on_fn(&["test"], move |spec| {
        let cmd = inner(spec);
        let fs = state.lock().unwrap();
        let path = &cmd[2];
        status(match cmd[1].as_str() {
            "-f" => fs.files.contains_key(path),
            "-d" => fs.dirs.contains(path),
            _ => fs.files.contains_key(path) || fs.dirs.contains(path),
        })
    });

    let state = fs.clone();
    runner.on_fn(&["find"], move |spec| {
        let cmd = inner(spec);
        let fs = state.lock().unwrap();
        let root = format!("{}/", cmd[1]);
        let kind = cmd
            .iter()
            .position(|a| a == "-type")
            .map(|i| cmd[i + 1].clone())
            .unwrap_or_default();
        let listing: Vec<String> = if kind == "f" {
            fs.files.keys().filter(|p| p.starts_with(&root)).cloned().collect()
        } else {
            fs.dirs.iter().filter(|p| p.starts_with(&root)).cloned().collect()
        };
        ScriptedRunner::ok(&listing.join("\n"))
    });

    let state = fs.clone();
    runner.on_fn(&["stat", "-c", "%s"], move |spec| {
        let cmd = inner(spec);
        match state.lock().unwrap().files.get(&cmd[3]) {
            Some(bytes) => ScriptedRunner::ok(&format!("{}\n", bytes.len())),
            None => ScriptedRunner::fail(1, "stat: cannot stat"),
        }
    });

    let state = fs.clone();
    runner.on_fn(&["base64"], move |spec| {
        let cmd = inner(spec);
        match state.lock().unwrap().files.get(&cmd[1]) {
            Some(bytes) => ScriptedRunner::ok(&format!("{}\n", STANDARD.encode(bytes))),
            None => ScriptedRunner::fail(1, "No such file"),
        }
    });

    let state = fs.clone();
    runner.on_fn(&["sh", "-c"], move |spec| {
        let cmd = inner(spec);
        let path = cmd.last().cloned().unwrap_or_default();
        let decoded = STANDARD
            .decode(spec.stdin.clone().unwrap_or_default())
            .unwrap_or_default();
        state.lock().unwrap().files.insert(path, decoded);
        ScriptedRunner::ok("")
    });

    let state = fs.clone();
    runner.on_fn(&["touch"], move |spec| {
        let cmd = inner(spec);
        state.lock().unwrap().files.insert(cmd[1].clone(), Vec::new());
        ScriptedRunner::ok("")
    });

    let state = fs.clone();
    runner.on_fn(&["mkdir", "-p"], move |spec| {
        let cmd = inner(spec);
        let mut fs = state.lock().unwrap();
        let mut current = String::new();
        for segment in cmd[2].split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            fs.dirs.insert(current.clone());
        }
        ScriptedRunner::ok("")
    });

    let state = fs.clone();
    runner.on_fn(&["rm"], move |spec| {
        let cmd = inner(spec);
        let target = cmd[2].clone();
        let prefix = format!("{}/", target);
        let mut fs = state.lock().unwrap();
        fs.files.retain(|p, _| p != &target && !p.starts_with(&prefix));
        fs.dirs.retain(|p| p != &target && !p.starts_with(&prefix));
        ScriptedRunner::ok("")
    });

    let state = fs;
    runner.on_fn(&["mv", "--"], move |spec| {
        let cmd = inner(spec);
        let (from, to) = (cmd[2].clone(), cmd[3].clone());
        let mut fs = state.lock().unwrap();
        let moved = |p: &String| {
            if p == &from || p.starts_with(&format!("{}/", from)) {
                format!("{}{}", to, &p[from.len()..])
            } else {
                p.clone()
            }
        };
        fs.files = std::mem::take(&mut fs.files)
            .into_iter()
            .map(|(p, b)| (moved(&p), b))
            .collect();
        fs.dirs = std::mem::take(&mut fs.dirs).iter().map(moved).collect();
        ScriptedRunner::ok("")
    });

    let mut settings = Settings::default().sandbox;
    settings.startup_interval = Duration::from_millis(1);
    let manager = Arc::new(SandboxManager::new(
        runner.clone(),
        settings,
        "stellar",
        EventBus::default(),
    ));
    (runner, manager)
}

fn gateway() -> (Arc<Mutex<FakeFs>>, Arc<ScriptedRunner>, FileGateway) {
    let fs = Arc::new(Mutex::new(FakeFs::with_project()));
    let (runner, manager) = sandbox(fs.clone());
    (fs, runner, FileGateway::new(manager, 1024))
}

#[tokio::test]
async fn test_write_then_read_round_trips_bytes() {
    let (_fs, _runner, files) = gateway();
    let content = b"use soroban_sdk::{contract};\n// \"quotes\" $HOME `ticks`\n\x00\xff".to_vec();

    let report = files
        .write("alice", "hello", "src/lib.rs", &content)
        .await
        .unwrap();
    assert_eq!(report.bytes_written, content.len());
    assert!(report.verified);

    let read = files.read("alice", "hello", "src/lib.rs").await.unwrap();
    assert_eq!(read, content);
}

#[tokio::test]
async fn test_payload_travels_over_stdin_not_argv() {
    let (_fs, runner, files) = gateway();
    files
        .write("alice", "hello", "src/lib.rs", b"secret; rm -rf /")
        .await
        .unwrap();

    let writes = runner.calls_matching(&["sh", "-c"]);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].argv().contains(&"-i"));
    assert!(!writes[0].argv().join(" ").contains("secret"));
    assert_eq!(
        writes[0].argv().last().copied(),
        Some("/home/developer/workspace/hello/src/lib.rs")
    );
}

#[tokio::test]
async fn test_write_requires_existing_file() {
    let (_fs, runner, files) = gateway();
    let err = files
        .write("alice", "hello", "src/missing.rs", b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::FileNotFound(_)));
    assert!(runner.calls_matching(&["sh", "-c"]).is_empty());
}

#[tokio::test]
async fn test_traversal_is_confined_to_project_root() {
    let (fs, runner, files) = gateway();
    fs.lock()
        .unwrap()
        .files
        .insert("/etc/passwd".to_string(), b"root".to_vec());

    let err = files
        .read("alice", "hello", "../../../../etc/passwd")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::FileNotFound(_)));

    for call in runner.calls_matching(&["test", "-f"]) {
        let path = call.argv().last().copied().unwrap_or_default();
        assert!(path.starts_with(PROJECT), "escaped root: {}", path);
    }
}

#[tokio::test]
async fn test_project_name_cannot_escape_workspace() {
    let (_fs, _runner, files) = gateway();
    assert!(matches!(
        files.list("alice", "../hello").await,
        Err(SandboxError::InvalidProjectName(_))
    ));
    assert!(matches!(
        files.list("alice", "").await,
        Err(SandboxError::ProjectRequired)
    ));
    assert!(matches!(
        files.list("alice", "ghost").await,
        Err(SandboxError::ProjectNotFound(_))
    ));
}

#[tokio::test]
async fn test_project_name_checked_before_sandbox() {
    let (_fs, runner, files) = gateway();
    runner.on(&["{{.State.Running}}"], ScriptedRunner::ok("false"));
    assert!(matches!(
        files.list("alice", "").await,
        Err(SandboxError::ProjectRequired)
    ));
    assert!(matches!(
        files.read("alice", "../etc", "Cargo.toml").await,
        Err(SandboxError::InvalidProjectName(_))
    ));
    assert!(runner.calls().is_empty());
    assert!(matches!(
        files.list("alice", "hello").await,
        Err(SandboxError::ContainerUnavailable(_))
    ));
}

#[tokio::test]
async fn test_read_rejects_oversized_file() {
    let (fs, runner, files) = gateway();
    fs.lock()
        .unwrap()
        .files
        .insert(format!("{}/big.bin", PROJECT), vec![0u8; 2048]);

    let err = files.read("alice", "hello", "big.bin").await.unwrap_err();
    assert!(matches!(err, SandboxError::FileTooLarge { limit: 1024, .. }));
    assert!(runner.calls_matching(&["base64"]).is_empty());
}

#[tokio::test]
async fn test_create_file_makes_parents_and_rejects_duplicates() {
    let (fs, _runner, files) = gateway();

    files
        .create_file("alice", "hello", "src/test/mod.rs", b"")
        .await
        .unwrap();
    {
        let fs = fs.lock().unwrap();
        assert!(fs.dirs.contains(&format!("{}/src/test", PROJECT)));
        assert_eq!(fs.files.get(&format!("{}/src/test/mod.rs", PROJECT)), Some(&Vec::new()));
    }

    let err = files
        .create_file("alice", "hello", "src/test/mod.rs", b"again")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::AlreadyExists(_)));

    files
        .create_file("alice", "hello", "README.md", b"# hello")
        .await
        .unwrap();
    assert_eq!(
        files.read("alice", "hello", "README.md").await.unwrap(),
        b"# hello"
    );
}

#[tokio::test]
async fn test_list_and_tree_exclude_build_output() {
    let (fs, _runner, files) = gateway();
    {
        let mut fs = fs.lock().unwrap();
        fs.dirs.insert(format!("{}/target", PROJECT));
        fs.files
            .insert(format!("{}/target/hello.wasm", PROJECT), vec![0]);
        fs.files.insert(format!("{}/Cargo.lock", PROJECT), vec![0]);
    }

    let listed = files.list("alice", "hello").await.unwrap();
    assert_eq!(listed, vec!["Cargo.toml", "src/lib.rs"]);

    let tree = files.tree("alice", "hello").await.unwrap();
    assert_eq!(tree[0].name, "src");
    assert_eq!(tree[0].kind, EntryKind::Directory);
    assert_eq!(tree[0].children.as_ref().unwrap()[0].path, "src/lib.rs");
    assert_eq!(tree[1].name, "Cargo.toml");
    assert_eq!(tree.len(), 2);
}

#[tokio::test]
async fn test_delete_folder_and_file() {
    let (fs, _runner, files) = gateway();

    assert!(matches!(
        files.delete_folder("alice", "hello", "..").await,
        Err(SandboxError::PathTraversalRejected(_))
    ));
    files.delete_file("alice", "hello", "Cargo.toml").await.unwrap();
    files.delete_folder("alice", "hello", "src").await.unwrap();

    let fs = fs.lock().unwrap();
    assert!(fs.files.keys().all(|p| !p.starts_with(PROJECT)));
    assert!(fs.dirs.contains(PROJECT));
}

#[tokio::test]
async fn test_operations_need_a_running_sandbox() {
    let fs = Arc::new(Mutex::new(FakeFs::with_project()));
    let (runner, manager) = sandbox(fs);
    runner.on(&["{{.State.Running}}"], ScriptedRunner::ok("false"));
    let files = FileGateway::new(manager, 1024);

    let err = files.read("alice", "hello", "Cargo.toml").await.unwrap_err();
    assert_eq!(err.code(), "CONTAINER_UNAVAILABLE");
}

#[tokio::test]
async fn test_write_size_mismatch_emits_warning() {
    let (_fs, runner, files) = gateway();
    runner.on(&["stat", "-c", "%s"], ScriptedRunner::ok("1\n"));
    let mut rx = files.manager().events().subscribe();

    let report = files
        .write("alice", "hello", "src/lib.rs", b"longer content")
        .await
        .unwrap();
    assert!(!report.verified);

    let mut warned = false;
    while let Ok(event) = rx.try_recv() {
        if let EventKind::Log { message, .. } = event.kind {
            warned |= message.contains("Size mismatch");
        }
    }
    assert!(warned);
}

#[tokio::test]
async fn test_project_store_lifecycle() {
    let fs = Arc::new(Mutex::new(FakeFs::with_project()));
    let (runner, manager) = sandbox(fs.clone());
    let store = ProjectStore::new(manager);

    let state = fs.clone();
    runner.on_fn(&["contract", "init"], move |spec| {
        let name = inner(spec).last().cloned().unwrap_or_default();
        state
            .lock()
            .unwrap()
            .dirs
            .insert(format!("{}/{}", WS, name));
        ScriptedRunner::ok("")
    });
    let state = fs.clone();
    runner.on_fn(&["-exec", "stat"], move |_| {
        let fs = state.lock().unwrap();
        let lines: Vec<String> = fs
            .dirs
            .iter()
            .filter_map(|d| d.strip_prefix(&format!("{}/", WS)).map(|rel| (d, rel)))
            .filter(|(_, rel)| !rel.contains('/'))
            .map(|(d, _)| format!("{}|1700000000", d))
            .collect();
        ScriptedRunner::ok(&lines.join("\n"))
    });

    let created = store
        .create("alice", "token", Some("A fungible token"))
        .await
        .unwrap();
    assert_eq!(created.id, "project_token");
    assert_eq!(created.description, "A fungible token");
    assert!(matches!(
        store.create("alice", "token", None).await,
        Err(SandboxError::ProjectExists(_))
    ));

    let names: Vec<String> = store
        .list("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["hello", "token"]);

    let renamed = store.rename("alice", "token", "coin").await.unwrap();
    assert_eq!(renamed.name, "coin");
    assert_eq!(renamed.created_at.timestamp(), 1_700_000_000);

    store.delete("alice", "coin").await.unwrap();
    assert!(matches!(
        store.get("alice", "coin").await,
        Err(SandboxError::ProjectNotFound(_))
    ));
}
