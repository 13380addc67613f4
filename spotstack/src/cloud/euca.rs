//! euca2ools / nova-manage backed cloud client.

use async_trait::async_trait;
use regex::Regex;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{CloudClient, Instance, InstanceType, LaunchRequest, Reservation};
use crate::util::{SharedToolRunner, ToolCommand};

/// EC2-style credentials handed to euca2ools through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EucaCredentials {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

pub struct EucaClient {
    runner: SharedToolRunner,
    nova_manage: String,
    credentials: Option<EucaCredentials>,
}

impl EucaClient {
    pub fn new(runner: SharedToolRunner, nova_manage: impl Into<String>) -> Self {
        Self {
            runner,
            nova_manage: nova_manage.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: EucaCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn euca(&self, program: &str) -> ToolCommand {
        let cmd = ToolCommand::new(program);
        match self.credentials {
            Some(ref c) => cmd
                .env("EC2_URL", c.endpoint.as_str())
                .env("EC2_ACCESS_KEY", c.access_key.as_str())
                .env("EC2_SECRET_KEY", c.secret_key.as_str()),
            None => cmd,
        }
    }
}

#[async_trait]
impl CloudClient for EucaClient {
    async fn run_instances(&self, request: LaunchRequest) -> SpotstackResult<Reservation> {
        let cmd = self
            .euca("euca-run-instances")
            .arg(&request.image_id)
            .args(["-t", request.instance_type.as_str()])
            .args(["--addressing", request.addressing.as_str()])
            .arg("-n")
            .arg(format!("{}-{}", request.min_count, request.max_count));

        let output = self.runner.run(cmd.clone()).await?.ensure_success(&cmd)?;
        parse_reservations(&output.stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| SpotstackError::Parse("euca-run-instances returned no reservation".into()))
    }

    async fn list_instances(&self) -> SpotstackResult<Vec<Reservation>> {
        let cmd = self.euca("euca-describe-instances");
        let output = self.runner.run(cmd.clone()).await?.ensure_success(&cmd)?;
        parse_reservations(&output.stdout)
    }

    async fn list_instance_types(&self) -> SpotstackResult<Vec<InstanceType>> {
        let cmd = ToolCommand::new(self.nova_manage.as_str()).args(["instance_type", "list"]);
        let output = self.runner.run(cmd.clone()).await?;
        if !output.stderr.trim().is_empty() {
            return Err(SpotstackError::Tool(format!(
                "could not run nova-manage instance_type list: {}",
                output.stderr.trim()
            )));
        }
        let output = output.ensure_success(&cmd)?;
        parse_instance_types(&output.stdout)
    }
}

/// Parse euca2ools `RESERVATION` / `INSTANCE` listing.
///
/// Columns are tab separated. For `INSTANCE` lines: id is column 1, public
/// dns name column 3, state column 5. Other record types are skipped.
pub fn parse_reservations(output: &str) -> SpotstackResult<Vec<Reservation>> {
    let mut reservations: Vec<Reservation> = Vec::new();

    for line in output.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        match fields[0] {
            "RESERVATION" => {
                let id = fields
                    .get(1)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| SpotstackError::Parse(format!("bad reservation line: {}", line)))?;
                reservations.push(Reservation {
                    id: id.to_string(),
                    instances: Vec::new(),
                });
            }
            "INSTANCE" => {
                if fields.len() < 6 {
                    return Err(SpotstackError::Parse(format!("bad instance line: {}", line)));
                }
                let reservation = reservations.last_mut().ok_or_else(|| {
                    SpotstackError::Parse(format!("instance outside reservation: {}", line))
                })?;
                reservation.instances.push(Instance {
                    id: fields[1].to_string(),
                    dns_name: fields[3].to_string(),
                    state: fields[5].to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(reservations)
}

/// Parse `nova-manage instance_type list`.
///
/// Each non-empty line looks like
/// `m1.small: Memory: 2048MB, VCPUS: 1, Storage: 20GB, ...`.
pub fn parse_instance_types(output: &str) -> SpotstackResult<Vec<InstanceType>> {
    let name_re = compile(r"^([^:]+)")?;
    let memory_re = compile(r"Memory:\s+(\d+)")?;
    let cpus_re = compile(r"VCPUS:\s+(\d+)")?;

    let capture = |re: &Regex, line: &str| -> SpotstackResult<String> {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| {
                SpotstackError::Parse(format!("could not parse nova-manage output {}", line))
            })
    };

    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let name = capture(&name_re, line)?;
            let memory = capture(&memory_re, line)?;
            let cpus = capture(&cpus_re, line)?;
            Ok(InstanceType {
                name,
                memory: parse_number(&memory, line)?,
                cpus: parse_number(&cpus, line)?,
            })
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(value: &str, line: &str) -> SpotstackResult<T> {
    value
        .parse()
        .map_err(|_| SpotstackError::Parse(format!("could not parse nova-manage output {}", line)))
}

fn compile(pattern: &str) -> SpotstackResult<Regex> {
    Regex::new(pattern).map_err(|e| SpotstackError::Internal(format!("bad pattern {}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Addressing;
    use crate::util::{ToolOutput, ToolRunner};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const DESCRIBE: &str = "RESERVATION\tr-abc\tproj\tdefault\n\
        INSTANCE\ti-00000001\tami-1\t10.0.0.2\t10.0.0.2\trunning\tNone (proj, node1)\t0\t\tm1.small\t2011-05-01T10:00:00Z\tnova\n\
        INSTANCE\ti-00000002\tami-1\t\t\tpending\tNone (proj, node1)\t1\t\tm1.small\t2011-05-01T10:00:00Z\tnova\n\
        RESERVATION\tr-def\tproj\tdefault\n\
        INSTANCE\ti-00000003\tami-2\t10.0.0.4\t10.0.0.4\tshutting-down\tNone\t0\t\tm1.tiny\t2011-05-01T10:00:00Z\tnova\n";

    #[test]
    fn test_parse_reservations() {
        let reservations = parse_reservations(DESCRIBE).unwrap();
        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations[0].id, "r-abc");
        assert_eq!(reservations[0].instances.len(), 2);
        assert_eq!(reservations[0].instances[0].dns_name, "10.0.0.2");
        assert_eq!(reservations[0].instances[1].dns_name, "");
        assert_eq!(reservations[0].instances[1].state, "pending");
        assert_eq!(reservations[1].instances[0].state, "shutting-down");
    }

    #[test]
    fn test_parse_reservations_rejects_orphan_instance() {
        let out = "INSTANCE\ti-1\tami-1\t\t\trunning\n";
        assert!(matches!(parse_reservations(out), Err(SpotstackError::Parse(_))));
    }

    #[test]
    fn test_parse_instance_types() {
        let out = "m1.small: Memory: 2048MB, VCPUS: 1, Storage: 20GB, FlavorID: 2\n\n\
                   m1.large: Memory: 8192MB, VCPUS: 4, Storage: 80GB, FlavorID: 4\n";
        let types = parse_instance_types(out).unwrap();
        assert_eq!(
            types,
            vec![
                InstanceType {
                    name: "m1.small".into(),
                    memory: 2048,
                    cpus: 1
                },
                InstanceType {
                    name: "m1.large".into(),
                    memory: 8192,
                    cpus: 4
                },
            ]
        );
    }

    #[test]
    fn test_parse_instance_types_missing_field() {
        let out = "m1.small: Memory: 2048MB, Storage: 20GB\n";
        assert!(matches!(parse_instance_types(out), Err(SpotstackError::Parse(_))));
    }

    struct Recorder {
        calls: Mutex<Vec<ToolCommand>>,
        reply: ToolOutput,
    }

    #[async_trait]
    impl ToolRunner for Recorder {
        async fn run(&self, command: ToolCommand) -> SpotstackResult<ToolOutput> {
            self.calls.lock().push(command);
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_run_instances_arguments() {
        let runner = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            reply: ToolOutput::ok(DESCRIBE),
        });
        let client = EucaClient::new(runner.clone(), "nova-manage").with_credentials(EucaCredentials {
            endpoint: "http://cloud:8773/services/Cloud".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
        });

        let request = LaunchRequest::single("ami-1", "m1.small");
        assert_eq!(request.addressing, Addressing::Private);
        let reservation = client.run_instances(request).await.unwrap();
        assert_eq!(reservation.id, "r-abc");

        let calls = runner.calls.lock();
        assert_eq!(
            calls[0].to_string(),
            "euca-run-instances ami-1 -t m1.small --addressing private -n 1-1"
        );
        assert!(!calls[0].args.iter().any(|a| a == "sk" || a == "ak"));
        assert_eq!(
            calls[0].env,
            vec![
                ("EC2_URL".to_string(), "http://cloud:8773/services/Cloud".to_string()),
                ("EC2_ACCESS_KEY".to_string(), "ak".to_string()),
                ("EC2_SECRET_KEY".to_string(), "sk".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_nova_manage_stderr_is_failure() {
        let runner = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            reply: ToolOutput {
                status: Some(0),
                stdout: "m1.small: Memory: 2048MB, VCPUS: 1\n".into(),
                stderr: "deprecated option\n".into(),
            },
        });
        let client = EucaClient::new(runner, "/usr/bin/nova-manage");
        assert!(matches!(
            client.list_instance_types().await,
            Err(SpotstackError::Tool(_))
        ));
    }
}
