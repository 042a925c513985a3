//! EC2 implementation backed by the `aws` CLI.
//!
//! Every call runs one `aws ec2 ...` process with `--output json`. Nothing is retried here;
//! the coordinator's polling cadence is the only repetition.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::client::SpotProvider;
use super::error::{ProviderError, ProviderResult};
use super::types::{BidRequest, BidStatus, InstanceDescription, InstanceState, LaunchSpec};

const CMD_TIMEOUT: Duration = Duration::from_secs(60);
const DRY_RUN_MARKER: &str = "DryRunOperation";
/// Request id reported for a dry-run submission.
pub const DRY_RUN_REQUEST_ID: &str = "sir-dry-run";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotRequestsResponse {
    #[serde(default)]
    spot_instance_requests: Vec<SpotRequestRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotRequestRecord {
    spot_instance_request_id: Option<String>,
    instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceRecord {
    state: Option<StateRecord>,
    public_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateRecord {
    name: String,
}

enum CommandOutcome {
    Completed(String),
    DryRunAccepted,
}

/// EC2 spot provider that shells out to `aws ec2`.
pub struct AwsCliProvider {
    aws_path: PathBuf,
    region: Option<String>,
    command_timeout: Duration,
}

impl AwsCliProvider {
    /// Uses `aws` from `PATH` and the CLI's default region.
    pub fn new() -> Self {
        Self {
            aws_path: PathBuf::from("aws"),
            region: None,
            command_timeout: CMD_TIMEOUT,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.aws_path = path.into();
        self
    }

    /// Per-command bound; the process is killed when it expires.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run(
        &self,
        operation: &str,
        mut args: Vec<String>,
        dry_run: bool,
    ) -> ProviderResult<CommandOutcome> {
        let label = format!("aws ec2 {operation}");
        let mut full = vec!["ec2".to_string(), operation.to_string()];
        full.append(&mut args);
        full.extend(["--output".to_string(), "json".to_string()]);
        if let Some(region) = &self.region {
            full.extend(["--region".to_string(), region.clone()]);
        }
        if dry_run {
            full.push("--dry-run".to_string());
        }

        debug!(command = %label, dry_run, "Invoking provider CLI");

        let child = Command::new(&self.aws_path)
            .args(&full)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProviderError::Spawn {
                label: label.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
        {
            Ok(res) => res.map_err(|source| ProviderError::Spawn {
                label: label.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ProviderError::CommandTimeout {
                    label,
                    timeout: self.command_timeout,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            return Ok(CommandOutcome::Completed(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            ));
        }
        if dry_run && stderr.contains(DRY_RUN_MARKER) {
            return Ok(CommandOutcome::DryRunAccepted);
        }

        Err(ProviderError::CommandFailed {
            label,
            message: stderr,
        })
    }

    fn parse<T: DeserializeOwned>(operation: &str, stdout: &str) -> ProviderResult<T> {
        serde_json::from_str(stdout).map_err(|e| ProviderError::InvalidResponse {
            label: format!("aws ec2 {operation}"),
            message: e.to_string(),
        })
    }
}

impl Default for AwsCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the `--launch-specification` document.
pub(crate) fn launch_spec_json(spec: &LaunchSpec) -> serde_json::Value {
    let mut doc = json!({
        "ImageId": spec.image_id,
        "InstanceType": spec.instance_type,
    });
    if !spec.key_name.is_empty() {
        doc["KeyName"] = json!(spec.key_name);
    }
    if !spec.security_groups.is_empty() {
        doc["SecurityGroups"] = json!(spec.security_groups);
    }
    if !spec.volumes.is_empty() {
        let mappings: Vec<_> = spec
            .volumes
            .iter()
            .map(|v| {
                json!({
                    "DeviceName": v.device_name,
                    "Ebs": {
                        "VolumeSize": v.size_gib,
                        "DeleteOnTermination": v.delete_on_termination,
                        "VolumeType": v.volume_type,
                        "Encrypted": v.encrypted,
                    }
                })
            })
            .collect();
        doc["BlockDeviceMappings"] = json!(mappings);
    }
    doc
}

#[async_trait]
impl SpotProvider for AwsCliProvider {
    async fn submit_bid(&self, bid: &BidRequest, dry_run: bool) -> ProviderResult<String> {
        const OP: &str = "request-spot-instances";
        let args = vec![
            "--spot-price".to_string(),
            bid.price.clone(),
            "--instance-count".to_string(),
            bid.instance_count.to_string(),
            "--launch-specification".to_string(),
            launch_spec_json(&bid.launch_spec).to_string(),
        ];

        let stdout = match self.run(OP, args, dry_run).await? {
            CommandOutcome::DryRunAccepted => return Ok(DRY_RUN_REQUEST_ID.to_string()),
            CommandOutcome::Completed(stdout) => stdout,
        };

        let response: SpotRequestsResponse = Self::parse(OP, &stdout)?;
        response
            .spot_instance_requests
            .into_iter()
            .next()
            .and_then(|r| r.spot_instance_request_id)
            .ok_or_else(|| ProviderError::InvalidResponse {
                label: format!("aws ec2 {OP}"),
                message: "no spot instance request id in response".to_string(),
            })
    }

    async fn describe_bid(&self, request_id: &str, dry_run: bool) -> ProviderResult<BidStatus> {
        const OP: &str = "describe-spot-instance-requests";
        let args = vec![
            "--spot-instance-request-ids".to_string(),
            request_id.to_string(),
        ];

        let stdout = match self.run(OP, args, dry_run).await? {
            CommandOutcome::DryRunAccepted => return Ok(BidStatus::unassigned()),
            CommandOutcome::Completed(stdout) => stdout,
        };

        let response: SpotRequestsResponse = Self::parse(OP, &stdout)?;
        let record = response
            .spot_instance_requests
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound {
                kind: "bid request",
                id: request_id.to_string(),
            })?;

        Ok(BidStatus {
            assigned_instance_id: record.instance_id,
        })
    }

    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription> {
        const OP: &str = "describe-instances";
        let args = vec!["--instance-ids".to_string(), instance_id.to_string()];

        let CommandOutcome::Completed(stdout) = self.run(OP, args, false).await? else {
            return Err(ProviderError::InvalidResponse {
                label: format!("aws ec2 {OP}"),
                message: "unexpected dry-run response".to_string(),
            });
        };

        let response: DescribeInstancesResponse = Self::parse(OP, &stdout)?;
        let record = response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| ProviderError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })?;

        let state = record
            .state
            .map(|s| InstanceState::from_provider_name(&s.name))
            .unwrap_or_default();

        Ok(InstanceDescription::new(state, record.public_ip_address))
    }

    async fn cancel_bids(&self, request_ids: &[String], dry_run: bool) -> ProviderResult<()> {
        if request_ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["--spot-instance-request-ids".to_string()];
        args.extend(request_ids.iter().cloned());
        self.run("cancel-spot-instance-requests", args, dry_run)
            .await
            .map(|_| ())
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> ProviderResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["--instance-ids".to_string()];
        args.extend(instance_ids.iter().cloned());
        self.run("terminate-instances", args, dry_run)
            .await
            .map(|_| ())
    }
}
