use keastore::{
    CommitResult, Config, DesiredRecord, DocumentFamily, Error, ErrorKind, Outcome, Reconciler,
    RecordSpec, Validator,
};
use maplit::btreeset;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Remembers every staged document it's asked about, and accepts or rejects all of them.
#[derive(Debug, Clone, Default)]
struct Recorder {
    calls: Rc<RefCell<Vec<(DocumentFamily, PathBuf, Value)>>>,
    reject: bool,
}

impl Recorder {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Validator for Recorder {
    fn validate(&self, family: DocumentFamily, staged: &Path) -> keastore::Result<()> {
        let contents = fs::read_to_string(staged).unwrap();
        let parsed = serde_json::from_str(&contents).unwrap();
        self.calls
            .borrow_mut()
            .push((family, staged.to_path_buf(), parsed));
        if self.reject {
            return Err(Error::ValidationRejected {
                command: "recorder".to_string(),
                path: staged.to_path_buf(),
                status: "exit status: 1".to_string(),
                output: "rejected by test".to_string(),
            });
        }
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.dhcp4.config_path = Some(dir.path().join("kea-dhcp4.conf"));
        config.ddns.config_path = Some(dir.path().join("kea-dhcp-ddns.conf"));
        Self { dir, config }
    }

    fn dhcp4(&self) -> PathBuf {
        self.dir.path().join("kea-dhcp4.conf")
    }

    fn ddns(&self) -> PathBuf {
        self.dir.path().join("kea-dhcp-ddns.conf")
    }

    fn seed(&self, path: &Path, document: Value) {
        fs::write(path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
    }

    fn read(&self, path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn reconciler(&self, validator: Recorder) -> Reconciler<Recorder> {
        Reconciler::new(self.config.clone(), validator)
    }
}

fn record(value: Value) -> DesiredRecord {
    serde_json::from_value(value).unwrap()
}

fn office() -> DesiredRecord {
    record(json!({
        "kind": "dhcp4-scope",
        "name": "office",
        "subnet": "192.0.2.0/24",
        "pools": ["192.0.2.100 - 192.0.2.199"],
    }))
}

fn printer() -> DesiredRecord {
    record(json!({
        "kind": "dhcp4-reservation",
        "name": "printer",
        "identifier-type": "hw-address",
        "identifier": "00:11:22:33:44:55",
        "ip-address": "192.0.2.10",
        "hostname": "printer",
    }))
}

fn dhcp4_server() -> DesiredRecord {
    record(json!({
        "kind": "dhcp4-server",
        "name": "dhcp4",
        "options": [{"name": "domain-name-servers", "data": "192.0.2.1"}],
    }))
}

fn subnets(document: &Value) -> &Vec<Value> {
    document["Dhcp4"]["subnet4"].as_array().unwrap()
}

#[test]
fn siblings_share_one_commit() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let mut reconciler = fixture.reconciler(recorder.clone());

    let report = reconciler.run(&[dhcp4_server(), office(), printer()]);
    assert!(report.success(), "{:?}", report);
    assert_eq!(recorder.count(), 1);
    assert_eq!(report.commits.len(), 1);
    assert_eq!(report.commits[0].config_path, fixture.dhcp4());
    assert_eq!(report.commits[0].result, Some(CommitResult::Committed));

    // The validator saw the whole batch, under the target's file name
    let calls = recorder.calls.borrow();
    let (family, staged, seen) = &calls[0];
    assert_eq!(*family, DocumentFamily::Dhcp4);
    assert_eq!(staged.file_name(), fixture.dhcp4().file_name());
    assert_ne!(staged.parent(), fixture.dhcp4().parent());
    assert!(!staged.exists());

    let written = fixture.read(&fixture.dhcp4());
    assert_eq!(seen, &written);
    assert_eq!(
        written["Dhcp4"]["option-data"],
        json!([{"name": "domain-name-servers", "data": "192.0.2.1"}])
    );
    let scope = &subnets(&written)[0];
    assert_eq!(scope["id"], json!(1));
    assert_eq!(scope["user-context"], json!({"managed-name": "office"}));
    assert_eq!(scope["reservations"][0]["hw-address"], "00:11:22:33:44:55");
    assert_eq!(
        scope["reservations"][0]["user-context"]["managed-name"],
        "printer"
    );
}

#[test]
fn ddns_siblings_share_one_commit() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let mut reconciler = fixture.reconciler(recorder.clone());

    let records = vec![
        record(json!({"kind": "ddns-server", "name": "dhcp-ddns"})),
        record(json!({
            "kind": "tsig-key",
            "name": "lab-key",
            "key-name": "lab-key.",
            "algorithm": "HMAC-SHA256",
            "secret": "c2VjcmV0",
        })),
        record(json!({
            "kind": "ddns-domain",
            "name": "lab",
            "domain-name": "lab.example.com.",
            "direction": "forward",
            "key-name": "lab-key.",
            "dns-servers": [{"ip-address": "192.0.2.53"}],
        })),
    ];
    let report = reconciler.run(&records);
    assert!(report.success(), "{:?}", report);
    assert_eq!(recorder.count(), 1);

    let written = fixture.read(&fixture.ddns());
    let section = &written["DhcpDdns"];
    assert_eq!(section["port"], json!(53001));
    assert_eq!(section["ncr-protocol"], "UDP");
    assert_eq!(section["tsig-keys"][0]["name"], "lab-key.");
    assert_eq!(
        section["forward-ddns"]["ddns-domains"][0]["name"],
        "lab.example.com."
    );
    assert_eq!(section["reverse-ddns"], json!({}));
}

#[test]
fn uncontrolled_records_commit_each_time() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let mut reconciler = fixture.reconciler(recorder.clone());

    let report = reconciler.run(&[office(), printer()]);
    assert!(report.success(), "{:?}", report);
    assert_eq!(recorder.count(), 2);
    // Nothing was left for the end of the pass
    assert!(report.commits.is_empty());
    assert_eq!(subnets(&fixture.read(&fixture.dhcp4())).len(), 1);
}

#[test]
fn rejected_commit_leaves_file_alone() {
    let fixture = Fixture::new();
    fixture.seed(
        &fixture.dhcp4(),
        json!({"Dhcp4": {"valid-lifetime": 4000, "subnet4": []}}),
    );
    let before = fs::read(fixture.dhcp4()).unwrap();

    let recorder = Recorder::rejecting();
    let mut reconciler = fixture.reconciler(recorder.clone());
    let report = reconciler.run(&[dhcp4_server(), office()]);

    assert!(!report.success());
    assert_eq!(recorder.count(), 1);
    let error = report.commits[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.message.contains("rejected by test"));
    assert_eq!(fs::read(fixture.dhcp4()).unwrap(), before);
    assert!(!recorder.calls.borrow()[0].1.exists());
    // Records themselves applied fine; it's the document that was refused
    assert!(report.records.iter().all(|r| r.error.is_none()));
    assert_eq!(reconciler.store().dirty_paths(), vec![fixture.dhcp4()]);
}

#[test]
fn rejected_immediate_commit_is_record_error() {
    let fixture = Fixture::new();
    let recorder = Recorder::rejecting();
    let mut reconciler = fixture.reconciler(recorder.clone());

    let report = reconciler.run(&[office()]);
    let error = report.records[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(!fixture.dhcp4().exists());
    // One attempt only; the document stays dirty
    assert_eq!(recorder.count(), 1);
    assert!(report.commits.is_empty());
    assert_eq!(reconciler.store().dirty_paths(), vec![fixture.dhcp4()]);
}

#[test]
fn second_pass_is_a_no_op() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let mut reconciler = fixture.reconciler(recorder.clone());
    let records = vec![dhcp4_server(), office(), printer()];

    assert!(reconciler.run(&records).success());
    let first = fs::read(fixture.dhcp4()).unwrap();
    assert_eq!(recorder.count(), 1);

    let report = reconciler.run(&records);
    assert!(report.success(), "{:?}", report);
    assert!(report
        .records
        .iter()
        .all(|r| r.outcome == Some(Outcome::Unchanged)));
    assert_eq!(report.commits[0].result, Some(CommitResult::Clean));
    assert_eq!(recorder.count(), 1);
    assert_eq!(fs::read(fixture.dhcp4()).unwrap(), first);
}

#[test]
fn unmanaged_content_survives() {
    let fixture = Fixture::new();
    let foreign = json!({
        "id": 7,
        "subnet": "10.0.0.0/24",
        "valid-lifetime": 600,
        "pools": [{"pool": "10.0.0.10 - 10.0.0.20"}],
        "reservations": [{"hw-address": "aa:bb:cc:dd:ee:ff", "ip-address": "10.0.0.5"}],
    });
    fixture.seed(
        &fixture.dhcp4(),
        json!({
            "Dhcp4": {
                "interfaces-config": {"interfaces": ["eth0"]},
                "subnet4": [foreign.clone()],
                "loggers": [{"name": "kea-dhcp4", "severity": "INFO"}],
            },
            "Logging": {"keep": true},
        }),
    );

    let mut reconciler = fixture.reconciler(Recorder::default());
    let report = reconciler.run(&[office()]);
    assert!(report.success(), "{:?}", report);

    let written = fixture.read(&fixture.dhcp4());
    assert_eq!(written["Logging"], json!({"keep": true}));
    assert_eq!(
        written["Dhcp4"]["interfaces-config"],
        json!({"interfaces": ["eth0"]})
    );
    assert_eq!(
        written["Dhcp4"]["loggers"],
        json!([{"name": "kea-dhcp4", "severity": "INFO"}])
    );
    let subnets = subnets(&written);
    assert_eq!(subnets.len(), 2);
    assert_eq!(subnets[0], foreign);
    assert_eq!(subnets[1]["id"], json!(8));

    // Key order of the section is kept as well
    let keys: Vec<_> = written["Dhcp4"].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["interfaces-config", "subnet4", "loggers"]);
}

#[test]
fn renamed_subnet_keeps_its_entry() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    assert!(reconciler.run(&[office()]).success());

    let moved = record(json!({
        "kind": "dhcp4-scope",
        "name": "office",
        "subnet": "198.51.100.0/24",
    }));
    let report = reconciler.run(&[moved]);
    assert!(report.success(), "{:?}", report);
    assert_eq!(report.records[0].outcome, Some(Outcome::Updated));

    let written = fixture.read(&fixture.dhcp4());
    let subnets = subnets(&written);
    assert_eq!(subnets.len(), 1);
    assert_eq!(subnets[0]["id"], json!(1));
    assert_eq!(subnets[0]["subnet"], "198.51.100.0/24");
    assert_eq!(subnets[0]["pools"], json!([]));
}

#[test]
fn duplicate_reservation_address_is_refused() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    assert!(reconciler.run(&[office(), printer()]).success());
    let before = fs::read(fixture.dhcp4()).unwrap();

    let scanner = record(json!({
        "kind": "dhcp4-reservation",
        "name": "scanner",
        "identifier-type": "hw-address",
        "identifier": "66:77:88:99:aa:bb",
        "ip-address": "192.0.2.10",
    }));
    let report = reconciler.run(&[scanner]);
    let error = report.records[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Conflict);
    assert!(error.message.contains("ip-address '192.0.2.10'"));
    assert!(report.records[0].snapshot.is_none());
    assert!(reconciler.store().dirty_paths().is_empty());
    assert_eq!(fs::read(fixture.dhcp4()).unwrap(), before);
}

#[test]
fn reservation_without_scope_is_refused() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());

    let report = reconciler.run(&[printer()]);
    let error = report.records[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::MissingParent);
    assert!(!fixture.dhcp4().exists());
}

#[test]
fn auto_ids_follow_the_highest() {
    let fixture = Fixture::new();
    fixture.seed(
        &fixture.dhcp4(),
        json!({"Dhcp4": {"subnet4": [
            {"id": 2, "subnet": "10.0.2.0/24"},
            {"id": 5, "subnet": "10.0.5.0/24"},
        ]}}),
    );
    let mut reconciler = fixture.reconciler(Recorder::default());

    let taken = record(json!({
        "kind": "dhcp4-scope",
        "name": "lab",
        "id": 5,
        "subnet": "10.0.9.0/24",
    }));
    let report = reconciler.run(&[office(), taken]);
    match &report.records[0].snapshot {
        Some(RecordSpec::Dhcp4Scope(scope)) => {
            assert_eq!(scope.id, keastore::record::ScopeId::Fixed(6))
        }
        other => panic!("unexpected snapshot {:?}", other),
    }
    let error = report.records[1].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Conflict);
    assert!(error.message.contains("Scope id 5 already in use"));

    let ids: BTreeSet<_> = subnets(&fixture.read(&fixture.dhcp4()))
        .iter()
        .map(|s| s["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, btreeset! {2, 5, 6});
}

#[test]
fn dry_run_validates_only() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let mut reconciler = fixture.reconciler(recorder.clone());
    reconciler.set_dry_run(true);

    let report = reconciler.run(&[dhcp4_server(), office()]);
    assert!(report.success(), "{:?}", report);
    assert_eq!(recorder.count(), 1);
    assert_eq!(report.commits[0].result, Some(CommitResult::Validated));
    assert!(!fixture.dhcp4().exists());
}

#[test]
fn absent_records_are_removed() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    assert!(reconciler
        .run(&[dhcp4_server(), office(), printer()])
        .success());

    let report = reconciler.run(&[printer().absent(), office().absent()]);
    assert!(report.success(), "{:?}", report);
    assert_eq!(report.records[0].outcome, Some(Outcome::Removed));
    assert_eq!(report.records[1].outcome, Some(Outcome::Removed));
    assert!(report.records.iter().all(|r| r.snapshot.is_none()));

    let written = fixture.read(&fixture.dhcp4());
    assert!(subnets(&written).is_empty());
    // The server settings weren't part of this pass
    assert!(written["Dhcp4"].get("option-data").is_some());

    let report = reconciler.run(&[office().absent()]);
    assert_eq!(report.records[0].outcome, Some(Outcome::AlreadyAbsent));
}

#[test]
fn list_names_every_record() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    assert!(reconciler
        .run(&[dhcp4_server(), office(), printer()])
        .success());

    reconciler.reset();
    let names: Vec<_> = reconciler
        .list(DocumentFamily::Dhcp4, None)
        .unwrap()
        .into_iter()
        .map(|listing| listing.name)
        .collect();
    assert_eq!(names, vec!["dhcp4", "office", "printer"]);
}

#[test]
fn second_record_cannot_claim_a_managed_subnet() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    let lab = record(json!({
        "kind": "dhcp4-scope",
        "name": "lab",
        "subnet": "192.0.2.0/24",
    }));

    let report = reconciler.run(&[office(), lab]);
    assert_eq!(report.records[0].outcome, Some(Outcome::Created));
    let error = report.records[1].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Conflict);
    assert!(error.message.contains("office"));

    let written = fixture.read(&fixture.dhcp4());
    assert_eq!(subnets(&written).len(), 1);
    assert_eq!(subnets(&written)[0]["user-context"]["managed-name"], "office");

    // The owner still sees its entry as it left it
    let report = reconciler.run(&[office()]);
    assert_eq!(report.records[0].outcome, Some(Outcome::Unchanged));
}

#[test]
fn second_record_cannot_claim_a_managed_reservation() {
    let fixture = Fixture::new();
    let mut reconciler = fixture.reconciler(Recorder::default());
    let copier = record(json!({
        "kind": "dhcp4-reservation",
        "name": "copier",
        "identifier-type": "hw-address",
        "identifier": "00:11:22:33:44:55",
        "ip-address": "192.0.2.11",
    }));

    let report = reconciler.run(&[office(), printer(), copier]);
    let error = report.records[2].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Conflict);
    let written = fixture.read(&fixture.dhcp4());
    let reservations = subnets(&written)[0]["reservations"].as_array().unwrap();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0]["user-context"]["managed-name"], "printer");
    assert_eq!(reservations[0]["ip-address"], "192.0.2.10");
}

#[test]
fn stock_server_settings_are_readable() {
    let fixture = Fixture::new();
    let lease_database = json!({"type": "memfile", "persist": true, "lfc-interval": 3600});
    fixture.seed(
        &fixture.dhcp4(),
        json!({"Dhcp4": {
            "lease-database": lease_database.clone(),
            "option-data": [{
                "name": "domain-name",
                "data": "example.com",
                "user-context": {"note": "set by hand"},
            }],
            "subnet4": [],
        }}),
    );

    let mut reconciler = fixture.reconciler(Recorder::default());
    let report = reconciler.run(&[dhcp4_server()]);
    assert!(report.success(), "{:?}", report);
    match &report.records[0].snapshot {
        Some(RecordSpec::Dhcp4Server(settings)) => {
            assert_eq!(settings.lease_database, None);
            assert_eq!(settings.options.len(), 1);
        }
        other => panic!("unexpected snapshot {:?}", other),
    }

    let written = fixture.read(&fixture.dhcp4());
    assert_eq!(written["Dhcp4"]["lease-database"], lease_database);

    let listed = reconciler.list(DocumentFamily::Dhcp4, None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "dhcp4");
}
