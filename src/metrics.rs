//! Prometheus metrics definitions and collection logic.
//!
//! A [`ScrapeCollector`] is created per scrape. Construction registers the
//! full metric surface of the profile's API version on a private registry;
//! [`ScrapeCollector::collect`] then walks the version's mapping table:
//!
//! 1. protection summary -> four unlabelled gauges
//! 2. job listing -> job count plus per-job schedule, status and mapped fields
//! 3. VM inventory -> per-VM gauges, joined to their owning job through the
//!    VM ids listed on each job
//!
//! VMs that belong to no job are skipped since there is no job to label them with.

use crate::client::ProxySession;
use crate::config::ConnectionProfile;
use crate::convert::{date_to_unix_timestamp, label_at, value_to_f64};
use crate::error::{ExporterError, Result};
use crate::schema::{ApiSchema, FieldMapping, JobsSpec, VmInventory, VmSource};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Namespace prepended to every metric name.
pub const NAMESPACE: &str = "veeam_ahvproxy";

const UNKNOWN: &str = "unknown";
const SUCCESS: &str = "success";

/// Upper bound on job listing pages fetched in one scrape.
const MAX_JOB_PAGES: usize = 1000;

const JOB_LABELS: &[&str] = &["job_id", "job_name"];
const JOB_STATUS_LABELS: &[&str] = &["job_id", "job_name", "job_status"];
const JOB_VM_LABELS: &[&str] = &["job_id", "job_name", "vm_id", "vm_name"];

/// One job (or policy) as decoded from the job listing.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    /// Lowercased status text, `unknown` when absent
    pub status: String,
    /// Schedule enabled
    pub enabled: bool,
    /// Next run as epoch seconds, 0 when disabled
    pub next_run: f64,
    /// VMs protected by the job
    pub vm_ids: Vec<String>,
    /// Values of the schema's extra per-job fields, by metric name
    pub values: Vec<(&'static str, f64)>,
}

impl JobRecord {
    /// Decode a job object. Jobs without an id are rejected.
    pub fn from_json(job: &Value, spec: &JobsSpec) -> Option<Self> {
        let id = label_at(job, spec.id_pointer)?;
        let name = label_at(job, spec.name_pointer).unwrap_or_else(|| UNKNOWN.to_string());

        let status = job
            .pointer(spec.status_pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| UNKNOWN.to_string());

        let (enabled, next_run) = match job.pointer(spec.next_run_pointer) {
            None | Some(Value::Null) => (false, 0.0),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case(spec.disabled_sentinel) => {
                (false, 0.0)
            }
            Some(Value::String(s)) => (true, date_to_unix_timestamp(s)),
            Some(other) => (true, value_to_f64(other)),
        };

        let vm_ids = job
            .pointer(spec.vm_ids_pointer)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|id| label_at(id, "")).collect())
            .unwrap_or_default();

        let values = spec
            .fields
            .iter()
            .map(|mapping| (mapping.metric.name, mapping.extract(job)))
            .collect();

        Some(Self {
            id,
            name,
            status,
            enabled,
            next_run,
            vm_ids,
            values,
        })
    }

    /// 0 for a successful last run, 1 for anything else.
    pub fn status_value(&self) -> f64 {
        if self.status == SUCCESS {
            0.0
        } else {
            1.0
        }
    }

    /// 1 when the schedule is enabled, 0 when disabled.
    pub fn state_value(&self) -> f64 {
        if self.enabled {
            1.0
        } else {
            0.0
        }
    }
}

/// Owning job of a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: String,
    pub name: String,
}

/// Transient VM id -> job index, built from the job listing of one scrape.
#[derive(Debug, Default)]
pub struct JobIndex {
    by_vm: HashMap<String, JobRef>,
}

impl JobIndex {
    /// Register every VM of a job. A VM listed by several jobs keeps the last one.
    pub fn insert(&mut self, job: &JobRecord) {
        for vm_id in &job.vm_ids {
            self.by_vm.insert(
                vm_id.clone(),
                JobRef {
                    id: job.id.clone(),
                    name: job.name.clone(),
                },
            );
        }
    }

    pub fn get(&self, vm_id: &str) -> Option<&JobRef> {
        self.by_vm.get(vm_id)
    }

    pub fn len(&self) -> usize {
        self.by_vm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vm.is_empty()
    }
}

/// Per-scrape metrics collector.
pub struct ScrapeCollector {
    schema: &'static ApiSchema,
    registry: Registry,

    // Exporter metrics
    up: Gauge,

    // Protection summary, keyed by metric name
    summary: HashMap<&'static str, Gauge>,

    // Job metrics
    job_count: Gauge,
    job_next_run: GaugeVec,
    job_state: GaugeVec,
    job_status: GaugeVec,
    job_fields: HashMap<&'static str, GaugeVec>,

    // Job VM metrics
    vm_fields: HashMap<&'static str, GaugeVec>,
}

impl ScrapeCollector {
    /// Create a collector and register the metric surface of `schema`.
    pub fn new(schema: &'static ApiSchema) -> Result<Self> {
        let registry = Registry::new();

        let up = register_gauge(
            &registry,
            "up",
            "Whether the last scrape of the proxy was successful (1 = success, 0 = failure)",
        )?;

        let mut summary = HashMap::new();
        for mapping in schema.summary_fields {
            let gauge = register_gauge(&registry, mapping.metric.name, mapping.metric.help)?;
            summary.insert(mapping.metric.name, gauge);
        }

        let job_count = register_gauge(&registry, "job_count", "Number of jobs managed by the proxy")?;
        let job_next_run = register_gauge_vec(
            &registry,
            "job_next_run",
            "Unix timestamp of the next scheduled run (0 when the schedule is disabled)",
            JOB_LABELS,
        )?;
        let job_state = register_gauge_vec(
            &registry,
            "job_state",
            "Schedule state of the job (1 = enabled, 0 = disabled)",
            JOB_LABELS,
        )?;
        let job_status = register_gauge_vec(
            &registry,
            "job_status",
            "Status of the last job run (0 = success, 1 = anything else)",
            JOB_STATUS_LABELS,
        )?;

        let job_fields = register_mapped(&registry, schema.jobs.fields, JOB_LABELS)?;

        let vm_mappings: Vec<FieldMapping> = schema
            .vms
            .sources()
            .into_iter()
            .flat_map(|source| source.fields.iter().copied())
            .collect();
        let vm_fields = register_mapped(&registry, &vm_mappings, JOB_VM_LABELS)?;

        Ok(Self {
            schema,
            registry,
            up,
            summary,
            job_count,
            job_next_run,
            job_state,
            job_status,
            job_fields,
            vm_fields,
        })
    }

    /// Log in with `profile` and collect.
    ///
    /// A failed login is reported through the `up` gauge and the returned
    /// error; it never affects other scrapes.
    pub async fn scrape(&self, profile: &ConnectionProfile) -> Result<()> {
        let session = match ProxySession::connect(profile).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to log in to {}: {}", profile.url, e);
                self.up.set(0.0);
                return Err(e);
            }
        };
        self.collect(&session).await
    }

    /// Collect all metrics through an authenticated session.
    pub async fn collect(&self, session: &ProxySession) -> Result<()> {
        info!("Collecting metrics from {}", session.base_url());

        match self.collect_internal(session).await {
            Ok(_) => {
                self.up.set(1.0);
                info!("Successfully collected metrics");
                Ok(())
            }
            Err(e) => {
                error!("Failed to collect metrics: {}", e);
                self.up.set(0.0);
                Err(e)
            }
        }
    }

    async fn collect_internal(&self, session: &ProxySession) -> Result<()> {
        if session.schema().version != self.schema.version {
            return Err(ExporterError::Metrics(format!(
                "session speaks API {} but collector was built for {}",
                session.schema().version,
                self.schema.version
            )));
        }

        // Protection summary
        let summary = session.get_json(self.schema.summary_path, &[]).await?;
        debug!("Protection state: {}", summary);
        self.update_summary_metrics(&summary);

        // Jobs
        let (count, jobs) = self.fetch_jobs(session).await?;
        self.job_count.set(count);

        let mut index = JobIndex::default();
        let mut records = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match JobRecord::from_json(job, &self.schema.jobs) {
                Some(record) => {
                    self.update_job_metrics(&record);
                    index.insert(&record);
                    records.push(record);
                }
                None => warn!("Skipping job without id: {}", job),
            }
        }
        debug!(
            "Indexed {} VMs across {} jobs",
            index.len(),
            records.len()
        );

        // VM inventory
        match &self.schema.vms {
            VmInventory::PerCluster {
                clusters_path,
                clusters_list_pointer,
                cluster_id_pointer,
                cluster_vms,
                protected_vms,
            } => {
                let clusters = session.get_json(clusters_path, &[]).await?;
                for cluster in list_at(&clusters, clusters_list_pointer, clusters_path)? {
                    let Some(cluster_id) = label_at(cluster, cluster_id_pointer) else {
                        warn!("Skipping cluster without id: {}", cluster);
                        continue;
                    };
                    self.collect_vm_source(session, cluster_vms, &cluster_id, &index)
                        .await;
                }
                self.collect_vm_source(session, protected_vms, "", &index)
                    .await;
            }
            VmInventory::PerJob { job_vms } => {
                for record in &records {
                    self.collect_vm_source(session, job_vms, &record.id, &index)
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Fetch the job listing, following pagination when the schema has it.
    ///
    /// Returns the reported job count and the raw job objects.
    async fn fetch_jobs(&self, session: &ProxySession) -> Result<(f64, Vec<Value>)> {
        let spec = &self.schema.jobs;

        let Some(pagination) = spec.pagination else {
            let body = session.get_json(spec.path, &[]).await?;
            let jobs = list_at(&body, spec.list_pointer, spec.path)?.to_vec();
            let count = job_total(&body, spec).unwrap_or(jobs.len() as f64);
            return Ok((count, jobs));
        };

        let mut jobs = Vec::new();
        let mut seen = HashSet::new();
        let mut total = None;
        for page_number in 0.. {
            if page_number >= MAX_JOB_PAGES {
                return Err(ExporterError::ParseError(format!(
                    "{}: job listing did not end after {} pages",
                    spec.path, MAX_JOB_PAGES
                )));
            }

            let query = [
                (pagination.offset_param, jobs.len().to_string()),
                (pagination.limit_param, pagination.page_size.to_string()),
            ];
            let body = session.get_json(spec.path, &query).await?;
            let page = list_at(&body, spec.list_pointer, spec.path)?;
            if total.is_none() {
                total = job_total(&body, spec);
            }

            // A proxy ignoring the offset serves the same page again
            let page_len = page.len();
            let before = jobs.len();
            for job in page {
                let key = label_at(job, spec.id_pointer).unwrap_or_else(|| job.to_string());
                if seen.insert(key) {
                    jobs.push(job.clone());
                }
            }
            debug!("Fetched {} jobs (page of {})", jobs.len(), page_len);

            if page_len > 0 && jobs.len() == before {
                warn!(
                    "{} returned no new jobs at offset {}, stopping pagination",
                    spec.path, before
                );
                break;
            }

            let reached_total = total.is_some_and(|t| jobs.len() as f64 >= t);
            if page_len == 0 || page_len < pagination.page_size || reached_total {
                break;
            }
        }

        let count = total.unwrap_or(jobs.len() as f64);
        Ok((count, jobs))
    }

    /// Fetch one VM source and record its VMs.
    ///
    /// Failures are logged and skipped so that one broken cluster or job does
    /// not hide the rest of the inventory.
    async fn collect_vm_source(
        &self,
        session: &ProxySession,
        source: &VmSource,
        id: &str,
        index: &JobIndex,
    ) {
        let path = source.path_for(id);
        let body = match session.get_json(&path, &[]).await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to get VMs from {}: {}", path, e);
                return;
            }
        };

        match list_at(&body, source.list_pointer, &path) {
            Ok(vms) => self.update_vm_metrics(source, vms, index),
            Err(e) => error!("Failed to decode VMs from {}: {}", path, e),
        }
    }

    fn update_summary_metrics(&self, summary: &Value) {
        for mapping in self.schema.summary_fields {
            if let Some(gauge) = self.summary.get(mapping.metric.name) {
                gauge.set(mapping.extract(summary));
            }
        }
    }

    fn update_job_metrics(&self, job: &JobRecord) {
        debug!("Updating metrics for job {} ({})", job.name, job.id);
        let labels = [job.id.as_str(), job.name.as_str()];

        self.job_next_run
            .with_label_values(&labels)
            .set(job.next_run);
        self.job_state
            .with_label_values(&labels)
            .set(job.state_value());
        self.job_status
            .with_label_values(&[job.id.as_str(), job.name.as_str(), job.status.as_str()])
            .set(job.status_value());

        for (metric, value) in &job.values {
            if let Some(gauge) = self.job_fields.get(metric) {
                gauge.with_label_values(&labels).set(*value);
            }
        }
    }

    fn update_vm_metrics(&self, source: &VmSource, vms: &[Value], index: &JobIndex) {
        debug!("Updating VM metrics for {} VMs from {}", vms.len(), source.path);

        for vm in vms {
            let Some(vm_id) = label_at(vm, source.id_pointer) else {
                continue;
            };
            let Some(job) = index.get(&vm_id) else {
                debug!("VM {} belongs to no job, skipping", vm_id);
                continue;
            };
            let vm_name = label_at(vm, source.name_pointer).unwrap_or_else(|| UNKNOWN.to_string());
            let labels = [
                job.id.as_str(),
                job.name.as_str(),
                vm_id.as_str(),
                vm_name.as_str(),
            ];

            for mapping in source.fields {
                if let Some(gauge) = self.vm_fields.get(mapping.metric.name) {
                    gauge.with_label_values(&labels).set(mapping.extract(vm));
                }
            }
        }
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::with_capacity(8192);
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| ExporterError::Metrics(e.to_string()))
    }
}

fn register_gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Register one gauge vector per distinct mapped metric name.
fn register_mapped(
    registry: &Registry,
    mappings: &[FieldMapping],
    labels: &[&str],
) -> Result<HashMap<&'static str, GaugeVec>> {
    let mut gauges = HashMap::new();
    for mapping in mappings {
        if gauges.contains_key(mapping.metric.name) {
            continue;
        }
        let gauge = register_gauge_vec(registry, mapping.metric.name, mapping.metric.help, labels)?;
        gauges.insert(mapping.metric.name, gauge);
    }
    Ok(gauges)
}

fn job_total(body: &Value, spec: &JobsSpec) -> Option<f64> {
    spec.count_pointer
        .and_then(|pointer| body.pointer(pointer))
        .map(value_to_f64)
}

fn list_at<'a>(body: &'a Value, pointer: &str, path: &str) -> Result<&'a [Value]> {
    body.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            ExporterError::ParseError(format!(
                "{}: expected a list at '{}'",
                path,
                if pointer.is_empty() { "/" } else { pointer }
            ))
        })
}
