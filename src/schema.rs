//! Declarative mapping tables for the supported proxy API versions.
//!
//! Each API version is described by one static [`ApiSchema`]. The collector
//! walks the schema instead of hard-coding endpoints and field names, so
//! adding a version means adding a table, not another collector.

use crate::convert::{number_at, timestamp_at};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Proxy API version spoken by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Legacy API: bare session token, per-job VM manifests
    V3,
    /// AHV proxy v4: OAuth2 bearer token, per-cluster VM inventory
    #[default]
    V4,
    /// Policy based API: paginated policies with extra schedule timestamps
    V5,
}

impl ApiVersion {
    /// Mapping table for this version.
    pub fn schema(self) -> &'static ApiSchema {
        match self {
            ApiVersion::V3 => &V3_SCHEMA,
            ApiVersion::V4 => &V4_SCHEMA,
            ApiVersion::V5 => &V5_SCHEMA,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiVersion::V3 => "v3",
            ApiVersion::V4 => "v4",
            ApiVersion::V5 => "v5",
        };
        f.write_str(s)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v3" | "3" => Ok(ApiVersion::V3),
            "v4" | "4" => Ok(ApiVersion::V4),
            "v5" | "5" => Ok(ApiVersion::V5),
            other => Err(format!(
                "unsupported API version '{}' (expected v3, v4 or v5)",
                other
            )),
        }
    }
}

/// How the session token is presented on authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: <token>`
    Bare,
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl AuthScheme {
    /// Build the `Authorization` header value for a token.
    pub fn header_value(self, token: &str) -> String {
        match self {
            AuthScheme::Bare => token.to_string(),
            AuthScheme::Bearer => format!("Bearer {}", token),
        }
    }
}

/// Conversion applied to a mapped JSON field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Integer, float or numeric string
    Number,
    /// Proxy date string, converted to Unix epoch seconds
    Timestamp,
}

/// Name and help text of a gauge, without the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
}

/// One `{json pointer -> gauge}` mapping.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub pointer: &'static str,
    pub metric: MetricDef,
    pub transform: Transform,
}

impl FieldMapping {
    /// Read and convert this field from a JSON object.
    pub fn extract(&self, value: &Value) -> f64 {
        match self.transform {
            Transform::Number => number_at(value, self.pointer),
            Transform::Timestamp => timestamp_at(value, self.pointer),
        }
    }
}

/// Login exchange: a form POST returning a JSON document with a token.
#[derive(Debug, Clone, Copy)]
pub struct LoginSpec {
    pub path: &'static str,
    pub username_field: &'static str,
    pub password_field: &'static str,
    pub extra_fields: &'static [(&'static str, &'static str)],
    pub token_field: &'static str,
    pub auth_scheme: AuthScheme,
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset_param: &'static str,
    pub limit_param: &'static str,
    pub page_size: usize,
}

/// Job (or policy) listing.
#[derive(Debug, Clone, Copy)]
pub struct JobsSpec {
    pub path: &'static str,
    /// Pointer to the array of jobs, empty when the body is the array itself
    pub list_pointer: &'static str,
    /// Pointer to the total count, the number of listed jobs when absent
    pub count_pointer: Option<&'static str>,
    pub pagination: Option<Pagination>,
    pub id_pointer: &'static str,
    pub name_pointer: &'static str,
    pub status_pointer: &'static str,
    pub next_run_pointer: &'static str,
    /// Value of the next-run field when the schedule is disabled
    pub disabled_sentinel: &'static str,
    /// Pointer to the VM ids protected by the job
    pub vm_ids_pointer: &'static str,
    /// Per-job gauges beyond the fixed schedule/status ones
    pub fields: &'static [FieldMapping],
}

/// A listing of VMs. `{id}` in `path` is replaced by the cluster or job id.
#[derive(Debug, Clone, Copy)]
pub struct VmSource {
    pub path: &'static str,
    pub list_pointer: &'static str,
    pub id_pointer: &'static str,
    pub name_pointer: &'static str,
    pub fields: &'static [FieldMapping],
}

impl VmSource {
    /// Path with the `{id}` placeholder substituted.
    pub fn path_for(&self, id: &str) -> String {
        self.path.replace("{id}", id)
    }
}

/// Where per-VM details come from.
#[derive(Debug, Clone, Copy)]
pub enum VmInventory {
    /// Walk every cluster's VM list, then the global protected VM list.
    PerCluster {
        clusters_path: &'static str,
        clusters_list_pointer: &'static str,
        cluster_id_pointer: &'static str,
        cluster_vms: VmSource,
        protected_vms: VmSource,
    },
    /// Fetch a VM manifest for every job.
    PerJob { job_vms: VmSource },
}

impl VmInventory {
    /// Every VM source, in fetch order.
    pub fn sources(&self) -> Vec<&VmSource> {
        match self {
            VmInventory::PerCluster {
                cluster_vms,
                protected_vms,
                ..
            } => vec![cluster_vms, protected_vms],
            VmInventory::PerJob { job_vms } => vec![job_vms],
        }
    }
}

/// Complete description of one proxy API version.
#[derive(Debug, Clone, Copy)]
pub struct ApiSchema {
    pub version: ApiVersion,
    pub login: LoginSpec,
    /// Whether request URLs end with a `/` before the query string
    pub trailing_slash: bool,
    pub summary_path: &'static str,
    pub summary_fields: &'static [FieldMapping],
    pub jobs: JobsSpec,
    pub vms: VmInventory,
}

const PROTECTED_VMS: MetricDef = MetricDef {
    name: "protected_vms",
    help: "Number of protected VMs on the cluster",
};
const UNPROTECTED_VMS: MetricDef = MetricDef {
    name: "unprotected_vms",
    help: "Number of unprotected VMs on the cluster",
};
const SNAPSHOT_PROTECTED_VMS: MetricDef = MetricDef {
    name: "snapshot_protected_vms",
    help: "Number of VMs protected by snapshot",
};
const TOTAL_VMS: MetricDef = MetricDef {
    name: "total_vms",
    help: "Number of total VMs on the cluster",
};
const JOB_VMS_COUNT: MetricDef = MetricDef {
    name: "job_vms_count",
    help: "Number of VMs protected by this job",
};
const JOB_LAST_RUN: MetricDef = MetricDef {
    name: "job_last_run",
    help: "Unix timestamp of the last run",
};
const JOB_LAST_SCHEDULED: MetricDef = MetricDef {
    name: "job_last_scheduled",
    help: "Unix timestamp of the last scheduled run",
};
const JOB_CREATED: MetricDef = MetricDef {
    name: "job_created",
    help: "Unix timestamp of the job creation",
};
const JOB_MODIFIED: MetricDef = MetricDef {
    name: "job_modified",
    help: "Unix timestamp of the last job modification",
};
const JOB_VM_SIZE_BYTES: MetricDef = MetricDef {
    name: "job_vm_size_bytes",
    help: "Size of the VM in bytes",
};
const JOB_VM_RESTORE_POINTS: MetricDef = MetricDef {
    name: "job_vm_restore_points",
    help: "Number of restore points of the VM",
};
const JOB_VM_LAST_SUCCESS: MetricDef = MetricDef {
    name: "job_vm_last_success",
    help: "Unix timestamp of the last successful protection of the VM",
};

const fn number(pointer: &'static str, metric: MetricDef) -> FieldMapping {
    FieldMapping {
        pointer,
        metric,
        transform: Transform::Number,
    }
}

const fn timestamp(pointer: &'static str, metric: MetricDef) -> FieldMapping {
    FieldMapping {
        pointer,
        metric,
        transform: Transform::Timestamp,
    }
}

const SUMMARY_FIELDS: &[FieldMapping] = &[
    number("/protectedVms", PROTECTED_VMS),
    number("/unprotectedVms", UNPROTECTED_VMS),
    number("/protectedVmsWithSnapshots", SNAPSHOT_PROTECTED_VMS),
    number("/totalVms", TOTAL_VMS),
];

const OAUTH_LOGIN: LoginSpec = LoginSpec {
    path: "/api/oauth2/token",
    username_field: "userName",
    password_field: "password",
    extra_fields: &[("grantType", "password")],
    token_field: "accessToken",
    auth_scheme: AuthScheme::Bearer,
};

static V3_SCHEMA: ApiSchema = ApiSchema {
    version: ApiVersion::V3,
    login: LoginSpec {
        path: "/api/v3/login",
        username_field: "username",
        password_field: "password",
        extra_fields: &[],
        token_field: "token",
        auth_scheme: AuthScheme::Bare,
    },
    trailing_slash: false,
    summary_path: "/api/v3/dashboard/protectedVms",
    summary_fields: SUMMARY_FIELDS,
    jobs: JobsSpec {
        path: "/api/v3/jobs",
        list_pointer: "",
        count_pointer: None,
        pagination: None,
        id_pointer: "/id",
        name_pointer: "/name",
        status_pointer: "/status",
        next_run_pointer: "/nextRun",
        disabled_sentinel: "Disabled",
        vm_ids_pointer: "/vmIds",
        fields: &[
            number("/vmCount", JOB_VMS_COUNT),
            timestamp("/lastRun", JOB_LAST_RUN),
        ],
    },
    vms: VmInventory::PerJob {
        job_vms: VmSource {
            path: "/api/v3/jobs/{id}/vms",
            list_pointer: "",
            id_pointer: "/vmId",
            name_pointer: "/vmName",
            fields: &[
                number("/size", JOB_VM_SIZE_BYTES),
                number("/restorePoints", JOB_VM_RESTORE_POINTS),
                timestamp("/lastSuccess", JOB_VM_LAST_SUCCESS),
            ],
        },
    },
};

static V4_SCHEMA: ApiSchema = ApiSchema {
    version: ApiVersion::V4,
    login: OAUTH_LOGIN,
    trailing_slash: true,
    summary_path: "/api/v4/dashboard/protectedVms",
    summary_fields: SUMMARY_FIELDS,
    jobs: JobsSpec {
        path: "/api/v4/jobs",
        list_pointer: "/results",
        count_pointer: Some("/totalCount"),
        pagination: None,
        id_pointer: "/id",
        name_pointer: "/name",
        status_pointer: "/status",
        next_run_pointer: "/nextRunUtc",
        disabled_sentinel: "Disabled",
        vm_ids_pointer: "/settings/vmIds",
        fields: &[
            number("/objects", JOB_VMS_COUNT),
            timestamp("/lastRunUtc", JOB_LAST_RUN),
        ],
    },
    vms: VmInventory::PerCluster {
        clusters_path: "/api/v4/clusters",
        clusters_list_pointer: "",
        cluster_id_pointer: "/id",
        cluster_vms: VmSource {
            path: "/api/v4/clusters/{id}/vms",
            list_pointer: "/results",
            id_pointer: "/id",
            name_pointer: "/name",
            fields: &[number("/vmSize", JOB_VM_SIZE_BYTES)],
        },
        protected_vms: VmSource {
            path: "/api/v4/protectedVms",
            list_pointer: "/results",
            id_pointer: "/id",
            name_pointer: "/name",
            fields: &[
                number("/backups", JOB_VM_RESTORE_POINTS),
                timestamp("/lastProtectionDateUtc", JOB_VM_LAST_SUCCESS),
            ],
        },
    },
};

static V5_SCHEMA: ApiSchema = ApiSchema {
    version: ApiVersion::V5,
    login: OAUTH_LOGIN,
    trailing_slash: false,
    summary_path: "/api/v5/dashboard/protectedVms",
    summary_fields: SUMMARY_FIELDS,
    jobs: JobsSpec {
        path: "/api/v5/policies",
        list_pointer: "/results",
        count_pointer: Some("/totalCount"),
        pagination: Some(Pagination {
            offset_param: "offset",
            limit_param: "limit",
            page_size: 100,
        }),
        id_pointer: "/id",
        name_pointer: "/name",
        status_pointer: "/status",
        next_run_pointer: "/nextRunUtc",
        disabled_sentinel: "Disabled",
        vm_ids_pointer: "/settings/vmIds",
        fields: &[
            number("/objects", JOB_VMS_COUNT),
            timestamp("/lastRunUtc", JOB_LAST_RUN),
            timestamp("/lastScheduledUtc", JOB_LAST_SCHEDULED),
            timestamp("/createdUtc", JOB_CREATED),
            timestamp("/modifiedUtc", JOB_MODIFIED),
        ],
    },
    vms: VmInventory::PerCluster {
        clusters_path: "/api/v5/clusters",
        clusters_list_pointer: "/results",
        cluster_id_pointer: "/id",
        cluster_vms: VmSource {
            path: "/api/v5/clusters/{id}/vms",
            list_pointer: "/results",
            id_pointer: "/id",
            name_pointer: "/name",
            fields: &[number("/vmSize", JOB_VM_SIZE_BYTES)],
        },
        protected_vms: VmSource {
            path: "/api/v5/protectedVms",
            list_pointer: "/results",
            id_pointer: "/id",
            name_pointer: "/name",
            fields: &[
                number("/backups", JOB_VM_RESTORE_POINTS),
                timestamp("/lastProtectionDateUtc", JOB_VM_LAST_SUCCESS),
            ],
        },
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_api_version_parsing() {
        assert_eq!("v3".parse::<ApiVersion>().unwrap(), ApiVersion::V3);
        assert_eq!("V4".parse::<ApiVersion>().unwrap(), ApiVersion::V4);
        assert_eq!("5".parse::<ApiVersion>().unwrap(), ApiVersion::V5);
        assert!("v6".parse::<ApiVersion>().is_err());
        assert_eq!(ApiVersion::default(), ApiVersion::V4);
        assert_eq!(ApiVersion::V5.to_string(), "v5");
    }

    #[test]
    fn test_auth_header_strategies() {
        assert_eq!(AuthScheme::Bare.header_value("abc"), "abc");
        assert_eq!(AuthScheme::Bearer.header_value("abc"), "Bearer abc");
    }

    #[test]
    fn test_schema_versions_match() {
        for version in [ApiVersion::V3, ApiVersion::V4, ApiVersion::V5] {
            assert_eq!(version.schema().version, version);
        }
    }

    #[test]
    fn test_mapped_metric_names_are_unique_per_source() {
        for version in [ApiVersion::V3, ApiVersion::V4, ApiVersion::V5] {
            let schema = version.schema();
            let mut seen = HashSet::new();
            for mapping in schema.summary_fields.iter().chain(schema.jobs.fields) {
                assert!(seen.insert(mapping.metric.name), "{}", mapping.metric.name);
            }
        }
    }

    #[test]
    fn test_only_v5_exposes_schedule_history() {
        let has = |v: ApiVersion| {
            v.schema()
                .jobs
                .fields
                .iter()
                .any(|m| m.metric.name == "job_last_scheduled")
        };
        assert!(!has(ApiVersion::V3));
        assert!(!has(ApiVersion::V4));
        assert!(has(ApiVersion::V5));
    }

    #[test]
    fn test_field_mapping_extract() {
        let job = serde_json::json!({"objects": "4", "lastRunUtc": "1/2/2006 3:04:05 PM"});
        let fields = ApiVersion::V4.schema().jobs.fields;
        assert_eq!(fields[0].extract(&job), 4.0);
        assert_eq!(fields[1].extract(&job), 1136214245.0);
    }

    #[test]
    fn test_vm_source_path_template() {
        match ApiVersion::V4.schema().vms {
            VmInventory::PerCluster { cluster_vms, .. } => {
                assert_eq!(cluster_vms.path_for("c-1"), "/api/v4/clusters/c-1/vms");
            }
            VmInventory::PerJob { .. } => panic!("v4 uses a per-cluster inventory"),
        }
    }
}
