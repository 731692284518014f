//! In-process stand-ins for Ansible and source APIs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use facts::{Credential, NewJob, RawFacts, ScanOptions, ScanType, Source, SourceKind, Store};
use scanner::{
    ansible::{AnsibleRunner, EventHandler, Playbook, RunRequest, RunStatus, RunnerEvent, Control},
    collect::{
        ApiConnector, ApiTarget, Backends, HostPage, ListPage, ManagedObject, ObjectPage, OpenShiftApi, RhacsApi,
        SatelliteApi, SatelliteFlavor, SatelliteHost, TowerApi, VcenterApi,
    },
    ApiError, BridgeError, Settings, TaskRunner,
};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

/// What a fake host does when a playbook runs against it.
#[derive(Clone, Debug)]
pub enum Script {
    /// Succeeds; inspection yields these facts.
    Ok(Value),

    /// A task fails.
    Fail,

    /// The host cannot be reached.
    Unreachable,
}

/// One recorded runner invocation.
struct Run {
    playbook: Playbook,
    hosts: Vec<String>,
    vars: Map<String, Value>,
}

/// An Ansible runner that plays scripted events.
#[derive(Default)]
pub struct FakeAnsible {
    scripts: BTreeMap<String, Script>,
    runs: Mutex<Vec<Run>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeAnsible {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a host; unscripted hosts succeed with facts naming the host.
    pub fn script(mut self, host: &str, script: Script) -> Self {
        self.scripts.insert(host.to_owned(), script);
        self
    }

    /// Set `token` once the `runs`th inspect run returns.
    pub fn cancel_after_inspect_runs(mut self, runs: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((runs, token));
        self
    }

    /// Hosts of every run, by playbook.
    pub fn runs(&self, playbook: Playbook) -> Vec<Vec<String>> {
        self.runs
            .lock()
            .expect("runs lock")
            .iter()
            .filter(|run| run.playbook == playbook)
            .map(|run| run.hosts.clone())
            .collect()
    }

    /// Inventory variables of every run, by playbook.
    pub fn vars(&self, playbook: Playbook) -> Vec<Map<String, Value>> {
        self.runs
            .lock()
            .expect("runs lock")
            .iter()
            .filter(|run| run.playbook == playbook)
            .map(|run| run.vars.clone())
            .collect()
    }
}

/// Facts an unscripted host reports.
pub fn default_facts(host: &str) -> Value {
    json!({
        "uname_hostname": host,
        "subscription_manager_id": format!("sm-{host}"),
        "cpu_count": 2,
        "internal_scratch": true,
    })
}

#[async_trait]
impl AnsibleRunner for FakeAnsible {
    async fn run(&self, request: RunRequest, events: &mut dyn EventHandler) -> Result<RunStatus, BridgeError> {
        let hosts = request.inventory.hosts(&request.limit).to_vec();
        let inspect_runs = {
            let mut runs = self.runs.lock().expect("runs lock");
            runs.push(Run {
                playbook: request.playbook,
                hosts: hosts.clone(),
                vars: request.inventory.vars().clone(),
            });
            runs.iter().filter(|run| run.playbook == Playbook::Inspect).count()
        };

        for host in &hosts {
            let script = self
                .scripts
                .get(host)
                .cloned()
                .unwrap_or_else(|| Script::Ok(default_facts(host)));
            let event = match (script, request.playbook) {
                (Script::Ok(_), Playbook::Connect) => RunnerEvent::new("runner_on_ok", host, json!({})),
                (Script::Ok(facts), Playbook::Inspect) => {
                    RunnerEvent::new("runner_on_ok", host, json!({"ansible_facts": facts}))
                }
                (Script::Fail, _) => RunnerEvent::new("runner_on_failed", host, json!({"msg": "permission denied"})),
                (Script::Unreachable, _) => RunnerEvent::new("runner_on_unreachable", host, json!({"msg": "no route"})),
            };
            if events.handle(event) == Control::Cancel {
                return Ok(RunStatus::Canceled);
            }
        }

        if request.playbook == Playbook::Inspect {
            if let Some((after, token)) = &self.cancel_after {
                if inspect_runs == *after {
                    token.cancel();
                }
            }
        }
        Ok(RunStatus::Successful)
    }
}

/// An OpenShift API server backed by canned responses; absent paths are not found.
#[derive(Clone, Default)]
pub struct FakeOpenShift {
    resources: BTreeMap<String, Value>,
}

impl FakeOpenShift {
    pub fn with(mut self, path: &str, value: Value) -> Self {
        self.resources.insert(path.to_owned(), value);
        self
    }
}

fn not_found(path: &str) -> ApiError {
    ApiError::NotFound { url: path.to_owned() }
}

#[async_trait]
impl OpenShiftApi for FakeOpenShift {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.resources.get(path).cloned().ok_or_else(|| not_found(path))
    }

    async fn list(&self, path: &str, _limit: usize, _token: Option<&str>) -> Result<ListPage, ApiError> {
        let items = self
            .resources
            .get(path)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| not_found(path))?;
        Ok(ListPage { items, token: None })
    }
}

/// Cancels a token once a fake has served the request it is keyed on.
#[derive(Clone)]
struct CancelAfter<K> {
    after: K,
    token: CancellationToken,
}

impl<K: PartialEq> CancelAfter<K> {
    fn served(cancel: &Option<Self>, request: &K) {
        if let Some(cancel) = cancel.as_ref().filter(|cancel| cancel.after == *request) {
            cancel.token.cancel();
        }
    }
}

fn server_error(url: String) -> ApiError {
    ApiError::Status {
        url,
        status: 500,
        body: String::from("internal server error"),
    }
}

/// A Satellite 6 server holding registered hosts.
#[derive(Clone, Default)]
pub struct FakeSatellite {
    hosts: Vec<(SatelliteHost, Option<Value>)>,
    pages: Arc<Mutex<Vec<(usize, usize)>>>,
    cancel: Option<CancelAfter<usize>>,
}

impl FakeSatellite {
    /// Register a host; collecting the facts of a host without facts fails.
    pub fn host(mut self, name: &str, facts: Option<Value>) -> Self {
        let id = (self.hosts.len() + 1).to_string();
        self.hosts.push((SatelliteHost { id, name: name.to_owned() }, facts));
        self
    }

    /// Set `token` once host page `page` has been served.
    pub fn cancel_after_page(mut self, page: usize, token: CancellationToken) -> Self {
        self.cancel = Some(CancelAfter { after: page, token });
        self
    }

    /// Every host page served, as `(page, per_page)`.
    pub fn pages(&self) -> Vec<(usize, usize)> {
        self.pages.lock().expect("pages lock").clone()
    }
}

#[async_trait]
impl SatelliteApi for FakeSatellite {
    fn flavor(&self) -> SatelliteFlavor {
        SatelliteFlavor::Satellite6V2
    }

    async fn hosts(&self, page: usize, per_page: usize) -> Result<HostPage, ApiError> {
        self.pages.lock().expect("pages lock").push((page, per_page));
        let hosts = self
            .hosts
            .iter()
            .skip(page.saturating_sub(1) * per_page)
            .take(per_page)
            .map(|(host, _)| host.clone())
            .collect();
        CancelAfter::served(&self.cancel, &page);
        Ok(HostPage {
            total: self.hosts.len(),
            hosts,
        })
    }

    async fn host_facts(&self, host: &SatelliteHost) -> Result<RawFacts, ApiError> {
        match self.hosts.iter().find(|(known, _)| known.id == host.id) {
            Some((_, Some(Value::Object(facts)))) => Ok(facts.clone().into_iter().collect()),
            Some((_, Some(_))) => Ok(RawFacts::new()),
            _ => Err(server_error(format!("/api/v2/hosts/{}", host.id))),
        }
    }
}

/// A vCenter inventory served in pages of the requested size.
///
/// Continuation tokens are the offset of the next object.
#[derive(Clone, Default)]
pub struct FakeVcenter {
    objects: Vec<ManagedObject>,
    tokens: Arc<Mutex<Vec<Option<String>>>>,
    failing_page: Option<usize>,
    cancel: Option<CancelAfter<usize>>,
}

impl FakeVcenter {
    pub fn object(mut self, kind: &str, id: &str, props: Value) -> Self {
        self.objects.push(ManagedObject {
            kind: kind.to_owned(),
            id: id.to_owned(),
            props: props.as_object().cloned().unwrap_or_default().into_iter().collect(),
        });
        self
    }

    /// Fail retrieving page `page`, counting from 1.
    pub fn fail_page(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// Set `token` once page `page` has been served.
    pub fn cancel_after_page(mut self, page: usize, token: CancellationToken) -> Self {
        self.cancel = Some(CancelAfter { after: page, token });
        self
    }

    /// The continuation token of every page requested.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().expect("tokens lock").clone()
    }
}

#[async_trait]
impl VcenterApi for FakeVcenter {
    fn about(&self) -> String {
        String::from("VMware vCenter Server 7.0.3")
    }

    async fn retrieve(&self, page_size: usize, token: Option<&str>) -> Result<ObjectPage, ApiError> {
        self.tokens.lock().expect("tokens lock").push(token.map(str::to_owned));
        let start = token.map(|token| token.parse::<usize>().expect("offset token")).unwrap_or(0);
        let page = start / page_size + 1;
        if self.failing_page == Some(page) {
            return Err(server_error(String::from("/sdk")));
        }
        let end = (start + page_size).min(self.objects.len());
        let objects = self.objects[start..end].to_vec();
        CancelAfter::served(&self.cancel, &page);
        Ok(ObjectPage {
            objects,
            token: (end < self.objects.len()).then(|| end.to_string()),
        })
    }
}

/// A JSON API answering GETs from canned responses; absent paths are not found.
///
/// Serves both Ansible controllers and RHACS Central.
#[derive(Clone, Default)]
pub struct FakeRest {
    responses: BTreeMap<String, Value>,
    requests: Arc<Mutex<Vec<String>>>,
    cancel: Option<CancelAfter<String>>,
}

impl FakeRest {
    pub fn with(mut self, path: &str, value: Value) -> Self {
        self.responses.insert(path.to_owned(), value);
        self
    }

    /// Set `token` once `path` has been served.
    pub fn cancel_after(mut self, path: &str, token: CancellationToken) -> Self {
        self.cancel = Some(CancelAfter {
            after: path.to_owned(),
            token,
        });
        self
    }

    /// Every path requested, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn respond(&self, path: &str) -> Result<Value, ApiError> {
        self.requests.lock().expect("requests lock").push(path.to_owned());
        let response = self.responses.get(path).cloned().ok_or_else(|| not_found(path))?;
        CancelAfter::served(&self.cancel, &path.to_owned());
        Ok(response)
    }
}

#[async_trait]
impl TowerApi for FakeRest {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.respond(path)
    }
}

#[async_trait]
impl RhacsApi for FakeRest {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.respond(path)
    }
}

/// Opens fake sessions; sources without a fake are unreachable.
#[derive(Clone, Default)]
pub struct FakeApis {
    pub satellite: Option<FakeSatellite>,
    pub vcenter: Option<FakeVcenter>,
    pub openshift: Option<FakeOpenShift>,
    pub tower: Option<FakeRest>,
    pub rhacs: Option<FakeRest>,
}

fn unreachable(target: &ApiTarget) -> ApiError {
    ApiError::Unreachable {
        url: target.host.clone(),
        reason: String::from("connection refused"),
    }
}

#[async_trait]
impl ApiConnector for FakeApis {
    async fn satellite(&self, target: &ApiTarget) -> Result<Box<dyn SatelliteApi>, ApiError> {
        match &self.satellite {
            Some(fake) => Ok(Box::new(fake.clone())),
            None => Err(unreachable(target)),
        }
    }

    async fn vcenter(&self, target: &ApiTarget) -> Result<Box<dyn VcenterApi>, ApiError> {
        match &self.vcenter {
            Some(fake) => Ok(Box::new(fake.clone())),
            None => Err(unreachable(target)),
        }
    }

    async fn openshift(&self, target: &ApiTarget) -> Result<Box<dyn OpenShiftApi>, ApiError> {
        match &self.openshift {
            Some(fake) => Ok(Box::new(fake.clone())),
            None => Err(unreachable(target)),
        }
    }

    async fn tower(&self, target: &ApiTarget) -> Result<Box<dyn TowerApi>, ApiError> {
        match &self.tower {
            Some(fake) => Ok(Box::new(fake.clone())),
            None => Err(unreachable(target)),
        }
    }

    async fn rhacs(&self, target: &ApiTarget) -> Result<Box<dyn RhacsApi>, ApiError> {
        match &self.rhacs {
            Some(fake) => Ok(Box::new(fake.clone())),
            None => Err(unreachable(target)),
        }
    }
}

/// A store, a runner over fakes, and the log directory the runner writes to.
pub struct Harness {
    pub store: Arc<Store>,
    pub runner: TaskRunner,
    pub ansible: Arc<FakeAnsible>,
    _logs: tempfile::TempDir,
}

impl Harness {
    pub fn new(ansible: FakeAnsible, apis: FakeApis) -> Self {
        Self::paged(ansible, apis, Settings::default().page_size())
    }

    /// A harness whose paginated APIs are read `page_size` rows at a time.
    pub fn paged(ansible: FakeAnsible, apis: FakeApis, page_size: usize) -> Self {
        let logs = tempfile::tempdir().expect("temp dir");
        let settings = Settings::builder().log_dir(logs.path()).page_size(page_size).build();
        let store = Arc::new(Store::new());
        let ansible = Arc::new(ansible);
        let backends = Backends {
            ansible: ansible.clone(),
            apis: Arc::new(apis),
        };
        let runner = TaskRunner::new(store.clone(), Arc::new(settings), backends);
        Self {
            store,
            runner,
            ansible,
            _logs: logs,
        }
    }

    /// Add a network source over `hosts`, excluding `exclude`.
    pub fn network_source(&self, name: &str, hosts: &[&str], exclude: &[&str]) -> facts::SourceId {
        let credential = self
            .store
            .add_credential(
                Credential::builder()
                    .name(format!("{name}-cred"))
                    .kind(SourceKind::Network)
                    .username("root")
                    .password("secret")
                    .build(),
            )
            .expect("must add credential");
        self.store
            .add_source(
                Source::builder()
                    .name(name)
                    .kind(SourceKind::Network)
                    .hosts(hosts.iter().map(|h| h.to_string()).collect())
                    .exclude_hosts(exclude.iter().map(|h| h.to_string()).collect())
                    .credentials(vec![credential])
                    .build(),
            )
            .expect("must add source")
    }

    /// Add an API source of `kind` at `host`, with a credential of the form the kind requires.
    pub fn api_source(&self, name: &str, kind: SourceKind, host: &str) -> facts::SourceId {
        let credential = match kind {
            SourceKind::Openshift | SourceKind::Rhacs => Credential::builder()
                .name(format!("{name}-cred"))
                .kind(kind)
                .auth_token("token")
                .build(),
            _ => Credential::builder()
                .name(format!("{name}-cred"))
                .kind(kind)
                .username("admin")
                .password("secret")
                .build(),
        };
        let credential = self.store.add_credential(credential).expect("must add credential");
        self.store
            .add_source(
                Source::builder()
                    .name(name)
                    .kind(kind)
                    .hosts(vec![host.to_owned()])
                    .credentials(vec![credential])
                    .build(),
            )
            .expect("must add source")
    }

    /// Create a job over `sources`.
    pub fn job(&self, sources: Vec<facts::SourceId>, scan_type: ScanType, max_concurrency: usize) -> facts::JobId {
        self.store
            .create_job(
                NewJob::builder()
                    .scan_type(scan_type)
                    .sources(sources)
                    .options(ScanOptions::builder().max_concurrency(max_concurrency).build())
                    .build(),
            )
            .expect("must create job")
    }
}
