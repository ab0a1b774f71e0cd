use std::fs;

use serde_json::Value;

mod common;

use common::{parse_json, FakePool};

#[test]
fn derived_setup_leaves_one_of_each_artifact() {
    let pool = FakePool::new("1.2");

    let assert = pool.setup().assert().success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    let report = &payload["details"]["report"];
    assert_eq!(report["state"], "active");
    assert_eq!(report["toolchain"]["family"], "gcc");
    assert_eq!(report["preprocess"], "gcc_remote");

    let artifacts = pool.artifacts();
    let count = |pred: &dyn Fn(&str) -> bool| {
        artifacts
            .iter()
            .filter(|name| pred(name.as_str()))
            .count()
    };
    assert_eq!(count(&|n| n.starts_with("icecc-create-env.") && n.ends_with(".tar.gz")), 1);
    assert_eq!(count(&|n| n.ends_with(".tar.gz.local")), 1);
    assert_eq!(count(&|n| n.ends_with(".sha256")), 1);
    assert_eq!(count(&|n| n.starts_with("icewrap_csig_") && n.ends_with(".tar.gz")), 1);
    assert_eq!(count(&|n| n.ends_with(".sha256.path")), 1);
    assert_eq!(count(&|n| n == "run-icecc"), 1);
    assert_eq!(artifacts.len(), 6, "unexpected artifacts: {artifacts:?}");
    assert!(!artifacts.contains(&"x.tar.gz".to_string()));

    let derived = artifacts
        .iter()
        .find(|n| n.starts_with("icecc-create-env.") && n.ends_with(".tar.gz"))
        .expect("derived archive");
    let recorded = fs::read_to_string(pool.target_dir().join(derived)).expect("derived archive");
    assert_eq!(
        recorded.trim_end(),
        format!(
            "toolchain for --gcc-12 {} {}",
            pool.tool("gcc-12").display(),
            pool.tool("g++-12").display()
        )
    );
    assert_eq!(report["toolchain"]["compiler_type"], "gcc-12");

    let link = report["fingerprint"]["link"].as_str().expect("link path");
    let wrapper = pool.target_dir().join("run-icecc");
    let script = fs::read_to_string(&wrapper).expect("wrapper");
    assert!(script.contains(&format!("ICECC_VERSION={link} ")), "{script}");
    assert!(script.contains(&pool.tool("icecc").display().to_string()));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&wrapper).expect("metadata").permissions().mode();
        assert_ne!(mode & 0o100, 0, "wrapper must be owner-executable");
    }
}

#[test]
fn setup_routes_compiles_and_throttles_links() {
    let pool = FakePool::new("1.3");

    let assert = pool
        .setup()
        .args(["--scheduler", "sched.pool.local"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    let host = &payload["details"]["host"];
    let wrapper = pool.target_dir().join("run-icecc").display().to_string();
    let icerun = pool.tool("icerun").display().to_string();

    for name in ["CCCOM", "CXXCOM", "SHCCCOM", "SHCXXCOM"] {
        let prefixes = host["commands"][name]["prefixes"].as_array().expect(name);
        assert_eq!(prefixes.len(), 1, "{name}");
        assert_eq!(prefixes[0]["kind"], "remote_compile");
        assert_eq!(prefixes[0]["wrapper"], Value::String(wrapper.clone()));
    }
    for name in ["ARCOM", "LINKCOM", "SHLINKCOM"] {
        let prefixes = host["commands"][name]["prefixes"].as_array().expect(name);
        assert_eq!(prefixes[0]["kind"], "throttle", "{name}");
        assert_eq!(prefixes[0]["icerun"], Value::String(icerun.clone()));
    }
    assert_eq!(host["env"]["USE_SCHEDULER"], "sched.pool.local");
    assert_eq!(host["env"]["ICECC_REMOTE_CPP"], "1");
    assert_eq!(host["emitters"][".cpp"][0], "icecream_toolchain_dependency");
}

#[test]
fn rerunning_setup_keeps_fingerprint_and_wrapper() {
    let pool = FakePool::new("1.2");

    let first = parse_json(&pool.setup().assert().success());
    let second = parse_json(&pool.setup().assert().success());

    let first = &first["details"]["report"];
    let second = &second["details"]["report"];
    assert_eq!(first["fingerprint"]["digest"], second["fingerprint"]["digest"]);
    assert_eq!(first["wrapper"]["written"], true);
    assert_eq!(second["wrapper"]["written"], false);
    assert_eq!(pool.artifacts().len(), 6);
}

#[test]
fn old_client_leaves_build_local() {
    let pool = FakePool::new("1.0");

    let assert = pool.setup().assert().success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["report"]["state"], "inactive");
    let host = &payload["details"]["host"];
    assert!(host["commands"]["CCCOM"]["prefixes"]
        .as_array()
        .expect("prefixes")
        .is_empty());
    assert!(!pool.target_dir().exists());
}

#[test]
fn user_provided_package_is_fingerprinted_as_is() {
    let pool = FakePool::new("1.2");
    let package = pool.root().join("clang-env.tar.gz");
    fs::write(&package, b"prebuilt").expect("package");

    let assert = pool
        .setup()
        .arg("--toolchain")
        .arg(&package)
        .assert()
        .success();
    let payload = parse_json(&assert);
    let report = &payload["details"]["report"];
    assert_eq!(report["package"]["version_id"], "user_provided.clang-env.tar.gz");
    assert_eq!(report["package"]["origin"], "user_provided");
    assert!(pool
        .target_dir()
        .join("user_provided.clang-env.tar.gz.local")
        .is_file());
}

#[test]
fn object_cache_takes_over_preprocessing() {
    let pool = FakePool::new("1.2");

    let assert = pool
        .setup()
        .arg("--object-cache")
        .env("CCFLAGS", "-O2 -fdirectives-only")
        .env("CCACHE_NOCPP2", "1")
        .assert()
        .success();
    let payload = parse_json(&assert);
    let host = &payload["details"]["host"];
    let wrapper = pool.target_dir().join("run-icecc").display().to_string();

    assert_eq!(host["env"]["CCACHE_PREFIX"], Value::String(wrapper));
    assert_eq!(host["env"]["CCACHE_CPP2"], "1");
    assert!(host["env"].get("CCACHE_NOCPP2").is_none());
    assert_eq!(host["ccflags"], serde_json::json!(["-O2"]));
    assert!(host["commands"]["CCCOM"]["prefixes"]
        .as_array()
        .expect("prefixes")
        .is_empty());
}

#[test]
fn malformed_addfile_is_a_user_error() {
    let pool = FakePool::new("1.2");

    let assert = pool.setup().args(["--addfile", "a=b=c"]).assert().code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["code"], "IW100");
    assert!(!pool.target_dir().exists());
}

#[test]
fn remapping_on_a_new_client_is_rejected() {
    let pool = FakePool::new("1.2");

    let assert = pool
        .setup()
        .args(["--addfile", "/etc/hostname=/dev/null"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "IW101");
}

#[test]
fn remap_flag_passes_paths_with_equals_to_old_clients() {
    let pool = FakePool::new("1.1");

    let assert = pool
        .setup()
        .args(["--addfile-remap", "/etc/app/a=b.conf", "/srv/a=b.conf"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    let report = &payload["details"]["report"];
    assert_eq!(report["state"], "active");

    let archive = report["package"]["archive"].as_str().expect("archive path");
    let recorded = fs::read_to_string(archive).expect("derived archive");
    assert!(
        recorded.contains("--addfile /etc/app/a=b.conf=/srv/a=b.conf"),
        "{recorded}"
    );
}

#[test]
fn unknown_compiler_family_fails_only_when_active() {
    let pool = FakePool::new("1.2");
    let assert = pool
        .setup()
        .args(["--compiler-family", "icx"])
        .assert()
        .code(1);
    assert_eq!(parse_json(&assert)["details"]["code"], "IW104");

    let old = FakePool::new("1.0");
    let assert = old
        .setup()
        .args(["--compiler-family", "icx"])
        .assert()
        .success();
    assert_eq!(parse_json(&assert)["details"]["report"]["state"], "inactive");
}
