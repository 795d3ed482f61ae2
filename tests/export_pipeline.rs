//! End-to-end runs of the export pipeline against a simulated `security`.

use async_trait::async_trait;
use base64::Engine;
use kodegen_bundler_export::config::{LOGIN_KEYCHAIN, TEMP_KEYCHAIN, VERIFY_KEYCHAIN};
use kodegen_bundler_export::error::Result;
use kodegen_bundler_export::macos::{CommandOutput, CommandRunner, SecurityCommand};
use kodegen_bundler_export::{ExportError, ExportOptions, ExportPaths, Pipeline, Stage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

const SIGNING_HASH: &str = "0123456789ABCDEF0123456789ABCDEF01234567";
const SIGNING_NAME: &str = "Developer ID Application: Acme Corp (TEAM123)";
const OTHER_HASH: &str = "FEDCBA9876543210FEDCBA9876543210FEDCBA98";
const OTHER_NAME: &str = "Apple Development: dev@example.com (XYZ)";
const ORIGINAL_SEARCH_LIST: [&str; 2] = [
    "/Users/dev/Library/Keychains/login.keychain-db",
    "/Library/Keychains/System.keychain",
];

/// Leading bytes of a DER SEQUENCE, so bundles are not valid UTF-8
const BUNDLE_MAGIC: [u8; 4] = [0x30, 0x82, 0xff, 0xfe];

#[derive(Clone, Debug)]
struct FakeIdentity {
    hash: String,
    name: String,
}

#[derive(Default)]
struct State {
    keychains: HashMap<String, Vec<FakeIdentity>>,
    search_list: Vec<String>,
    calls: Vec<Vec<String>>,
}

/// What `security export` leaves behind
#[derive(Default, Clone, Copy)]
enum ExportOutput {
    #[default]
    Bundle,
    Absent,
    ZeroBytes,
}

/// In-memory stand-in for the keychain subsystem
///
/// Like the real tool, creating a keychain appends it to the user search
/// list and deleting one removes it.
#[derive(Default)]
struct FakeSecurity {
    state: Mutex<State>,
    export_output: ExportOutput,
    corrupt_on_verify: bool,
    /// Deleting the scratch keychain fails once it holds identities
    scratch_delete_fails: bool,
}

impl FakeSecurity {
    fn new() -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.keychains.insert(
                LOGIN_KEYCHAIN.to_string(),
                vec![
                    FakeIdentity {
                        hash: SIGNING_HASH.to_string(),
                        name: SIGNING_NAME.to_string(),
                    },
                    FakeIdentity {
                        hash: OTHER_HASH.to_string(),
                        name: OTHER_NAME.to_string(),
                    },
                ],
            );
            state.search_list = ORIGINAL_SEARCH_LIST.iter().map(|s| s.to_string()).collect();
        }
        fake
    }

    fn with_stale_keychains(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.keychains.insert(TEMP_KEYCHAIN.to_string(), Vec::new());
            state.keychains.insert(VERIFY_KEYCHAIN.to_string(), Vec::new());
        }
        self
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c[0] == subcommand)
            .collect()
    }

    fn keychain_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().keychains.contains_key(name)
    }

    fn search_list(&self) -> Vec<String> {
        self.state.lock().unwrap().search_list.clone()
    }

    fn handle(&self, state: &mut State, argv: &[String]) -> CommandOutput {
        let last = argv.last().cloned().unwrap_or_default();
        match argv[0].as_str() {
            "help" => ok(""),
            "show-keychain-info" | "set-keychain-settings" | "unlock-keychain" => {
                if state.keychains.contains_key(&last) {
                    ok("")
                } else {
                    not_found(&last)
                }
            }
            "delete-keychain" => {
                let holds_identities = state.keychains.get(&last).is_some_and(|ids| !ids.is_empty());
                if self.scratch_delete_fails && last == TEMP_KEYCHAIN && holds_identities {
                    return fail(1, "security: SecKeychainDelete: UNIX[Operation not permitted]");
                }
                if state.keychains.remove(&last).is_some() {
                    state.search_list.retain(|k| *k != last);
                    ok("")
                } else {
                    not_found(&last)
                }
            }
            "create-keychain" => {
                if state.keychains.contains_key(&last) {
                    fail(48, "A keychain with the same name already exists.")
                } else {
                    state.keychains.insert(last.clone(), Vec::new());
                    state.search_list.push(last);
                    ok("")
                }
            }
            "list-keychains" => {
                if let Some(pos) = argv.iter().position(|a| a == "-s") {
                    state.search_list = argv[pos + 1..].to_vec();
                    ok("")
                } else {
                    let stdout: String = state
                        .search_list
                        .iter()
                        .map(|k| format!("    \"{k}\"\n"))
                        .collect();
                    ok(&stdout)
                }
            }
            "find-identity" => match state.keychains.get(&last) {
                Some(identities) => {
                    let mut stdout = String::from("Policy: X509 Basic\n  Matching identities\n");
                    for (i, id) in identities.iter().enumerate() {
                        stdout.push_str(&format!("  {}) {} \"{}\"\n", i + 1, id.hash, id.name));
                    }
                    stdout.push_str(&format!("     {} identities found\n", identities.len()));
                    ok(&stdout)
                }
                None => not_found(&last),
            },
            "delete-identity" => {
                let hash = value_after(argv, "-Z");
                match state.keychains.get_mut(&last) {
                    Some(identities) => {
                        identities.retain(|id| id.hash != hash);
                        ok("")
                    }
                    None => not_found(&last),
                }
            }
            "export" => {
                let keychain = value_after(argv, "-k");
                let password = value_after(argv, "-P");
                let output = value_after(argv, "-o");
                let Some(identities) = state.keychains.get(&keychain) else {
                    return not_found(&keychain);
                };
                match self.export_output {
                    ExportOutput::Bundle => {
                        std::fs::write(&output, encode_bundle(&password, identities)).unwrap();
                    }
                    ExportOutput::ZeroBytes => std::fs::write(&output, b"").unwrap(),
                    ExportOutput::Absent => {}
                }
                ok("")
            }
            "import" => {
                let keychain = value_after(argv, "-k");
                let password = value_after(argv, "-P");
                let bytes = std::fs::read(&argv[1]).unwrap();
                if self.corrupt_on_verify && keychain == VERIFY_KEYCHAIN {
                    return fail(1, "security: SecKeychainItemImport: Unknown format in import.");
                }
                let Some((bundle_password, identities)) = decode_bundle(&bytes) else {
                    return fail(1, "security: SecKeychainItemImport: Unknown format in import.");
                };
                if bundle_password != password {
                    return fail(
                        1,
                        "security: SecKeychainItemImport: MAC verification failed during PKCS12 import (wrong password?)",
                    );
                }
                match state.keychains.get_mut(&keychain) {
                    Some(existing) => {
                        existing.extend(identities);
                        ok("1 identity imported.")
                    }
                    None => not_found(&keychain),
                }
            }
            other => fail(1, &format!("unknown subcommand {other}")),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeSecurity {
    async fn run(&self, command: &SecurityCommand) -> Result<CommandOutput> {
        let argv: Vec<String> = command.argv().map(str::to_string).collect();
        let mut state = self.state.lock().unwrap();
        state.calls.push(argv.clone());
        Ok(self.handle(&mut state, &argv))
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn not_found(keychain: &str) -> CommandOutput {
    fail(
        50,
        &format!("security: The specified keychain could not be found: {keychain}"),
    )
}

fn value_after(argv: &[String], flag: &str) -> String {
    let pos = argv.iter().position(|a| a == flag).unwrap();
    argv[pos + 1].clone()
}

fn encode_bundle(password: &str, identities: &[FakeIdentity]) -> Vec<u8> {
    let mut bytes = BUNDLE_MAGIC.to_vec();
    bytes.extend_from_slice(format!("{password}\n").as_bytes());
    for id in identities {
        bytes.extend_from_slice(format!("{}|{}\n", id.hash, id.name).as_bytes());
    }
    bytes
}

fn decode_bundle(bytes: &[u8]) -> Option<(String, Vec<FakeIdentity>)> {
    let body = std::str::from_utf8(bytes.strip_prefix(&BUNDLE_MAGIC)?).ok()?;
    let mut lines = body.lines();
    let password = lines.next()?.to_string();
    let identities = lines
        .filter_map(|l| l.split_once('|'))
        .map(|(hash, name)| FakeIdentity {
            hash: hash.to_string(),
            name: name.to_string(),
        })
        .collect();
    Some((password, identities))
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(env: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), env).unwrap();
        Self { dir }
    }

    fn options(&self, all_identities: bool) -> ExportOptions {
        let root = self.dir.path();
        ExportOptions {
            paths: ExportPaths {
                env_file: root.join(".env"),
                p12_output: root.join("scripts/certificate.p12"),
                base64_output: root.join("scripts/certificate_base64.txt"),
            },
            all_identities,
        }
    }

    fn p12(&self) -> std::path::PathBuf {
        self.dir.path().join("scripts/certificate.p12")
    }

    fn base64(&self) -> std::path::PathBuf {
        self.dir.path().join("scripts/certificate_base64.txt")
    }
}

fn valid_env() -> String {
    format!(
        "# signing identity\nAPPLE_CERT_HASH={}\nAPPLE_CERT_EXPORT_PASS=\"export secret\"\nAPPLE_TEMP_KEYCHAIN_PASS='temp-pass'\n",
        SIGNING_HASH.to_lowercase()
    )
}

fn bundle_hashes(path: &Path) -> Vec<String> {
    let (_, identities) = decode_bundle(&std::fs::read(path).unwrap()).unwrap();
    identities.into_iter().map(|id| id.hash).collect()
}

#[tokio::test]
async fn missing_required_key_runs_no_commands() {
    let ws = Workspace::new("APPLE_CERT_HASH=abc\n");
    let fake = FakeSecurity::new();

    let mut pipeline = Pipeline::new(&fake, ws.options(false));
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, ExportError::MissingConfig(_)));
    assert!(fake.calls().is_empty());
    assert_eq!(pipeline.stage(), Stage::Failed);
    assert_eq!(pipeline.failed_during(), Some(Stage::Loading));
    assert!(!ws.dir.path().join("scripts").exists());
}

#[tokio::test]
async fn exports_only_the_configured_identity() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity::new();

    let mut pipeline = Pipeline::new(&fake, ws.options(false));
    let report = pipeline.run().await.unwrap();

    assert_eq!(pipeline.stage(), Stage::Done);
    assert_eq!(bundle_hashes(&ws.p12()), [SIGNING_HASH]);

    let identity = report.identity.unwrap();
    assert_eq!(identity.hash, SIGNING_HASH);
    assert_eq!(identity.name, SIGNING_NAME);

    let bytes = std::fs::read(&ws.p12()).unwrap();
    assert_eq!(report.size, bytes.len());
    let text = std::fs::read_to_string(&ws.base64()).unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(text)
        .unwrap();
    assert_eq!(decoded, bytes);

    // The login keychain is exported exactly once
    let login_exports: Vec<_> = fake
        .calls_to("export")
        .into_iter()
        .filter(|c| value_after(c, "-k") == LOGIN_KEYCHAIN)
        .collect();
    assert_eq!(login_exports.len(), 1);
    assert_eq!(value_after(&login_exports[0], "-P"), "export secret");

    // Quotes are stripped from the scratch keychain password
    let create = &fake.calls_to("create-keychain")[0];
    assert_eq!(value_after(create, "-p"), "temp-pass");

    assert!(!fake.keychain_exists(TEMP_KEYCHAIN));
    assert!(!fake.keychain_exists(VERIFY_KEYCHAIN));
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);

    // The search list pointed at the scratch keychain while exporting
    let set_calls: Vec<_> = fake
        .calls_to("list-keychains")
        .into_iter()
        .filter(|c| c.contains(&"-s".to_string()))
        .collect();
    assert_eq!(
        set_calls[0][4..],
        [TEMP_KEYCHAIN.to_string(), LOGIN_KEYCHAIN.to_string()]
    );
}

#[tokio::test]
async fn all_identities_mode_exports_everything() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity::new();

    let report = Pipeline::new(&fake, ws.options(true)).run().await.unwrap();

    assert!(report.identity.is_none());
    assert_eq!(bundle_hashes(&ws.p12()), [SIGNING_HASH, OTHER_HASH]);
    assert_eq!(fake.calls_to("export").len(), 1);
    assert!(fake.calls_to("delete-identity").is_empty());
}

#[tokio::test]
async fn unknown_identity_fails_before_export() {
    let ws = Workspace::new(
        "APPLE_CERT_HASH=1111111111111111111111111111111111111111\nAPPLE_CERT_EXPORT_PASS=x\n",
    );
    let fake = FakeSecurity::new();

    let mut pipeline = Pipeline::new(&fake, ws.options(false));
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, ExportError::IdentityNotFound(_)));
    assert_eq!(pipeline.failed_during(), Some(Stage::Exporting));
    assert!(fake.calls_to("export").is_empty());
    assert!(!fake.keychain_exists(TEMP_KEYCHAIN));
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);
}

#[tokio::test]
async fn empty_export_stops_before_verification() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity {
        export_output: ExportOutput::Absent,
        ..FakeSecurity::new()
    };

    let mut pipeline = Pipeline::new(&fake, ws.options(false));
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, ExportError::ExportFailed { .. }));
    assert_eq!(pipeline.failed_during(), Some(Stage::Exporting));
    assert!(fake.calls_to("import").is_empty());
    assert!(!fake.calls_to("create-keychain").iter().any(|c| c.contains(&VERIFY_KEYCHAIN.to_string())));
    assert!(!ws.base64().exists());
    assert!(!fake.keychain_exists(TEMP_KEYCHAIN));
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);
}

#[tokio::test]
async fn failed_verification_still_deletes_verify_keychain() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity {
        corrupt_on_verify: true,
        ..FakeSecurity::new()
    };

    let mut pipeline = Pipeline::new(&fake, ws.options(false));
    let err = pipeline.run().await.unwrap_err();

    match err {
        ExportError::VerificationFailed(msg) => assert!(msg.contains("Unknown format")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.failed_during(), Some(Stage::Verifying));
    assert!(fake.calls_to("create-keychain").iter().any(|c| c.contains(&VERIFY_KEYCHAIN.to_string())));
    assert!(!fake.keychain_exists(VERIFY_KEYCHAIN));
    assert!(!fake.keychain_exists(TEMP_KEYCHAIN));
    assert!(!ws.base64().exists());
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);
}

#[tokio::test]
async fn reruns_clean_up_stale_state() {
    let ws = Workspace::new(&valid_env());
    std::fs::create_dir_all(ws.p12().parent().unwrap()).unwrap();
    std::fs::write(ws.p12(), b"stale bundle").unwrap();
    std::fs::write(ws.base64(), "c3RhbGU=").unwrap();
    let fake = FakeSecurity::new().with_stale_keychains();

    let first = Pipeline::new(&fake, ws.options(false)).run().await.unwrap();
    let second = Pipeline::new(&fake, ws.options(false)).run().await.unwrap();

    assert_eq!(first.size, second.size);
    assert_eq!(bundle_hashes(&ws.p12()), [SIGNING_HASH]);
    assert!(!fake.keychain_exists(TEMP_KEYCHAIN));
    assert!(!fake.keychain_exists(VERIFY_KEYCHAIN));
}

#[tokio::test]
async fn zero_byte_export_stops_before_verification() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity {
        export_output: ExportOutput::ZeroBytes,
        ..FakeSecurity::new()
    };

    let mut pipeline = Pipeline::new(&fake, ws.options(true));
    let err = pipeline.run().await.unwrap_err();

    match err {
        ExportError::ExportFailed { message, .. } => assert!(message.contains("empty")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.failed_during(), Some(Stage::Exporting));
    assert!(fake.calls_to("import").is_empty());
    assert_eq!(std::fs::metadata(ws.p12()).unwrap().len(), 0);
    assert!(!ws.base64().exists());
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);
}

#[tokio::test]
async fn search_list_restored_when_scratch_keychain_survives() {
    let ws = Workspace::new(&valid_env());
    let fake = FakeSecurity {
        scratch_delete_fails: true,
        ..FakeSecurity::new()
    };

    Pipeline::new(&fake, ws.options(false)).run().await.unwrap();

    assert!(fake.keychain_exists(TEMP_KEYCHAIN));
    assert_eq!(fake.search_list(), ORIGINAL_SEARCH_LIST);

    // Snapshot was read before create-keychain touched the list
    let first_list_call = fake
        .calls()
        .iter()
        .position(|c| c[0] == "list-keychains")
        .unwrap();
    let first_create = fake
        .calls()
        .iter()
        .position(|c| c[0] == "create-keychain")
        .unwrap();
    assert!(first_list_call < first_create);
}
