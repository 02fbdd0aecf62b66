use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn shotpipe(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("shotpipe"));
    cmd.env("SHOTPIPE_HOME", home)
        .env_remove("SHOTGRID_URL")
        .env_remove("SHOTGRID_SCRIPT_NAME")
        .env_remove("SHOTGRID_API_KEY")
        .env_remove("RUST_LOG")
        .current_dir(home);
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn source_tree(root: &Path) -> std::path::PathBuf {
    let source = root.join("renders");
    fs::create_dir_all(source.join("LIG")).unwrap();
    fs::create_dir_all(source.join("forest")).unwrap();
    fs::write(source.join("LIG").join("take.png"), b"lig").unwrap();
    fs::write(source.join("forest").join("clip_c004.mov"), b"forest").unwrap();
    fs::write(source.join("readme.txt"), b"text").unwrap();
    source
}

#[test]
fn help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    let output = shotpipe(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for cmd in ["scan", "process", "upload", "parse", "history", "init-config"] {
        assert!(text.contains(cmd), "help text missing {cmd}: {text}");
    }
}

#[test]
fn parse_reports_components() {
    let home = TempDir::new().unwrap();
    let output = shotpipe(home.path())
        .args(["parse", "LIG_c001_txtToImage_v0003.png"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("sequence=LIG"), "{text}");
    assert!(text.contains("shot=c001"), "{text}");
    assert!(text.contains("version=v0003"), "{text}");
}

#[test]
fn parse_fails_on_invalid_name() {
    let home = TempDir::new().unwrap();
    let output = shotpipe(home.path())
        .args(["parse", "LIG_c001_comp_v0001.exr", "final_render.png"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).contains("final_render.png\t不符合命名规则"));
}

#[test]
fn scan_lists_candidates_and_skips() {
    let home = TempDir::new().unwrap();
    let source = source_tree(home.path());
    let output = shotpipe(home.path())
        .arg("scan")
        .arg(&source)
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("txtToImage\tLIG_c001"), "{text}");
    assert!(text.contains("imgToVideo\tforest_c004"), "{text}");
    assert!(text.contains("readme.txt"), "{text}");
}

#[test]
fn scan_honours_config_recursion() {
    let home = TempDir::new().unwrap();
    let source = source_tree(home.path());
    fs::write(home.path().join("config.toml"), "[general]\nrecursive = false\n").unwrap();
    let output = shotpipe(home.path())
        .arg("scan")
        .arg(&source)
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(!text.contains("take.png"), "{text}");
    assert!(text.contains("readme.txt"), "{text}");
}

#[test]
fn process_dry_run_leaves_disk_untouched() {
    let home = TempDir::new().unwrap();
    let source = source_tree(home.path());
    let out = home.path().join("out");
    let output = shotpipe(home.path())
        .arg("process")
        .arg(&source)
        .arg("--output")
        .arg(&out)
        .arg("--dry-run")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("LIG_c001_txtToImage_v0001.png"), "{text}");
    assert!(text.contains("forest_c004_imgToVideo_v0001.mov"), "{text}");
    assert!(!out.exists());
}

#[test]
fn process_then_history_stats() {
    let home = TempDir::new().unwrap();
    let source = source_tree(home.path());
    let out = home.path().join("out");
    let output = shotpipe(home.path())
        .arg("process")
        .arg(&source)
        .arg("--output")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(out
        .join("processed")
        .join("batch01")
        .join("LIG_c001_txtToImage_v0001.png")
        .is_file());
    assert!(stdout(&output).contains("清单:"));

    let stats = shotpipe(home.path())
        .args(["history", "stats"])
        .output()
        .unwrap();
    assert!(stats.status.success());
    assert!(stdout(&stats).contains("已处理文件: 2"), "{}", stdout(&stats));

    // 第二次运行不会重复处理
    let again = shotpipe(home.path())
        .arg("process")
        .arg(&source)
        .arg("--output")
        .arg(&out)
        .output()
        .unwrap();
    assert!(again.status.success());
    assert!(stdout(&again).contains("成功 0"), "{}", stdout(&again));
}

#[test]
fn process_rejects_bad_shot() {
    let home = TempDir::new().unwrap();
    let source = source_tree(home.path());
    let output = shotpipe(home.path())
        .arg("process")
        .arg(&source)
        .args(["--shot", "shot-one"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn init_config_refuses_to_overwrite() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("config.toml");
    let first = shotpipe(home.path())
        .arg("init-config")
        .arg(&path)
        .output()
        .unwrap();
    assert!(first.status.success());
    assert!(fs::read_to_string(&path).unwrap().contains("[file_processing]"));

    let second = shotpipe(home.path())
        .arg("init-config")
        .arg(&path)
        .output()
        .unwrap();
    assert!(!second.status.success());
}

#[test]
fn upload_without_credentials_fails() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("manifest.json");
    fs::write(&manifest, "{}").unwrap();
    let output = shotpipe(home.path())
        .arg("upload")
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
