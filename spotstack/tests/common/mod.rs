//! Shared fixtures for integration tests: an in-memory cloud, a scripted
//! host for external tools, a local package server and package archives.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use spotstack::cloud::{CloudClient, Instance, InstanceType, LaunchRequest, Reservation};
use spotstack::db::Database;
use spotstack::util::{ToolCommand, ToolOutput, ToolRunner};
use spotstack::{SpotstackError, SpotstackOptions, SpotstackResult, SpotstackRuntime, Task};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const PUBLISH_SCRIPT: &str = "/opt/uec/publish-tarball";
pub const FIRST_PARTITION_SECTOR: u32 = 63;

// ============================================================================
// FAKE CLOUD
// ============================================================================

#[derive(Default)]
struct CloudState {
    instance_types: Vec<InstanceType>,
    reservations: Vec<Reservation>,
    launches: Vec<LaunchRequest>,
    launch_error: Option<String>,
    types_error: Option<String>,
    /// Return reservations without instances, forcing a re-list.
    detached_reservations: bool,
    next_id: usize,
}

/// In-memory cloud control plane.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_instance_types(&self, types: &[(&str, u64, u32)]) {
        self.state.lock().instance_types = types
            .iter()
            .map(|(name, memory, cpus)| InstanceType {
                name: name.to_string(),
                memory: *memory,
                cpus: *cpus,
            })
            .collect();
    }

    pub fn fail_instance_types(&self, message: &str) {
        self.state.lock().types_error = Some(message.to_string());
    }

    pub fn fail_launches(&self, message: &str) {
        self.state.lock().launch_error = Some(message.to_string());
    }

    pub fn detach_reservations(&self) {
        self.state.lock().detached_reservations = true;
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().launches.clone()
    }

    /// Add a running instance outside any launch.
    pub fn add_instance(&self, id: &str, state: &str, dns_name: &str) {
        let mut s = self.state.lock();
        s.next_id += 1;
        let reservation_id = format!("r-{:08x}", s.next_id);
        s.reservations.push(Reservation {
            id: reservation_id,
            instances: vec![Instance {
                id: id.to_string(),
                dns_name: dns_name.to_string(),
                state: state.to_string(),
            }],
        });
    }

    pub fn set_instance(&self, id: &str, state: &str, dns_name: &str) {
        let mut s = self.state.lock();
        for instance in s.reservations.iter_mut().flat_map(|r| r.instances.iter_mut()) {
            if instance.id == id {
                instance.state = state.to_string();
                instance.dns_name = dns_name.to_string();
            }
        }
    }

    pub fn remove_instance(&self, id: &str) {
        let mut s = self.state.lock();
        for reservation in s.reservations.iter_mut() {
            reservation.instances.retain(|i| i.id != id);
        }
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn run_instances(&self, request: LaunchRequest) -> SpotstackResult<Reservation> {
        let mut s = self.state.lock();
        s.launches.push(request.clone());
        if let Some(ref message) = s.launch_error {
            return Err(SpotstackError::Tool(message.clone()));
        }

        s.next_id += 1;
        let reservation = Reservation {
            id: format!("r-{:08x}", s.next_id),
            instances: vec![Instance {
                id: format!("i-{:08x}", s.next_id),
                dns_name: String::new(),
                state: "pending".to_string(),
            }],
        };
        s.reservations.push(reservation.clone());

        if s.detached_reservations {
            return Ok(Reservation {
                id: reservation.id,
                instances: Vec::new(),
            });
        }
        Ok(reservation)
    }

    async fn list_instances(&self) -> SpotstackResult<Vec<Reservation>> {
        Ok(self.state.lock().reservations.clone())
    }

    async fn list_instance_types(&self) -> SpotstackResult<Vec<InstanceType>> {
        let s = self.state.lock();
        if let Some(ref message) = s.types_error {
            return Err(SpotstackError::Tool(message.clone()));
        }
        Ok(s.instance_types.clone())
    }
}

// ============================================================================
// SCRIPTED HOST
// ============================================================================

#[derive(Default)]
struct HostState {
    calls: Vec<ToolCommand>,
    /// Active loop mounts: (mount dir, backing disk).
    mounts: Vec<(PathBuf, PathBuf)>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    omit_boot_files: bool,
}

/// Simulates mount, losetup, dd, qemu-img, umount and the publish tool by
/// producing the files the real tools would.
#[derive(Default)]
pub struct ScriptedHost {
    state: Mutex<HostState>,
    published: AtomicUsize,
    publish_delay: Mutex<Duration>,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of `tool` exit with status 1.
    pub fn fail(&self, tool: &str) {
        self.state.lock().failing.insert(tool.to_string());
    }

    /// Make every call of `tool` panic.
    pub fn panic_on(&self, tool: &str) {
        self.state.lock().panicking.insert(tool.to_string());
    }

    pub fn omit_boot_files(&self) {
        self.state.lock().omit_boot_files = true;
    }

    /// Slow down publishing to widen race windows.
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.state.lock().calls.clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.display_name().to_string())
            .collect()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.tool_names().iter().filter(|n| n.as_str() == tool).count()
    }

    pub fn active_mounts(&self) -> usize {
        self.state.lock().mounts.len()
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    fn mount(&self, cmd: &ToolCommand) -> SpotstackResult<ToolOutput> {
        let [_, options, disk, mount_dir] = cmd.args.as_slice() else {
            return Ok(ToolOutput::failed(1, "usage: mount -o <opts> <disk> <dir>"));
        };
        let expected = format!(
            "loop,offset={}",
            u64::from(FIRST_PARTITION_SECTOR) * 512
        );
        if *options != expected {
            return Ok(ToolOutput::failed(32, format!("bad offset option {}", options)));
        }

        let boot = Path::new(mount_dir).join("boot");
        std::fs::create_dir_all(&boot)?;
        if !self.state.lock().omit_boot_files {
            std::fs::write(boot.join("initrd.img-2.6.35"), b"initrd-new")?;
            std::fs::write(boot.join("initrd.img-2.6.32"), b"initrd-old")?;
            std::fs::write(boot.join("vmlinuz-2.6.32"), b"kernel")?;
            std::fs::write(boot.join("config-2.6.32"), b"config")?;
        }

        self.state
            .lock()
            .mounts
            .push((PathBuf::from(mount_dir), PathBuf::from(disk)));
        Ok(ToolOutput::ok(""))
    }

    fn losetup(&self) -> ToolOutput {
        let listing: String = self
            .state
            .lock()
            .mounts
            .iter()
            .enumerate()
            .map(|(i, (_, disk))| {
                format!(
                    "/dev/loop{}: [0801]:{} ({}), offset {}\n",
                    i,
                    1000 + i,
                    disk.display(),
                    u64::from(FIRST_PARTITION_SECTOR) * 512
                )
            })
            .collect();
        ToolOutput::ok(listing)
    }

    fn dd(&self, cmd: &ToolCommand) -> SpotstackResult<ToolOutput> {
        let arg = |prefix: &str| {
            cmd.args
                .iter()
                .find_map(|a| a.strip_prefix(prefix).map(str::to_string))
        };
        let (Some(input), Some(output)) = (arg("if="), arg("of=")) else {
            return Ok(ToolOutput::failed(1, "dd: missing operand"));
        };
        let index: usize = input
            .strip_prefix("/dev/loop")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SpotstackError::Tool(format!("dd: bad input {}", input)))?;
        if index >= self.state.lock().mounts.len() {
            return Ok(ToolOutput::failed(1, format!("dd: {}: no such device", input)));
        }
        std::fs::write(&output, format!("rootfs from {}", input))?;
        Ok(ToolOutput::ok(""))
    }

    fn qemu_img(&self, cmd: &ToolCommand) -> SpotstackResult<ToolOutput> {
        let src = &cmd.args[3];
        let dst = &cmd.args[6];
        let raw = std::fs::read(src)?;
        let mut converted = b"QFI\xfb".to_vec();
        converted.extend_from_slice(&raw);
        std::fs::write(dst, converted)?;
        Ok(ToolOutput::ok(""))
    }

    fn umount(&self, cmd: &ToolCommand) -> ToolOutput {
        let target = PathBuf::from(&cmd.args[0]);
        let mut state = self.state.lock();
        let before = state.mounts.len();
        state.mounts.retain(|(dir, _)| *dir != target);
        if state.mounts.len() == before {
            return ToolOutput::failed(32, format!("umount: {}: not mounted", target.display()));
        }
        ToolOutput::ok("")
    }

    async fn publish(&self, cmd: &ToolCommand) -> SpotstackResult<ToolOutput> {
        let cwd = cmd
            .cwd
            .clone()
            .ok_or_else(|| SpotstackError::Tool("publish: no working dir".into()))?;
        let bundle = cwd.join(&cmd.args[0]);
        if !bundle.is_file() {
            return Ok(ToolOutput::failed(1, format!("{} not found", bundle.display())));
        }

        let delay = *self.publish_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let n = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolOutput::ok(format!(
            "Wed May  4 10:00:00 2011: ====== uploading {} ======\n\
             emi=\"ami-{:08x}\"; eri=\"none\"; eki=\"aki-{:08x}\";\n",
            cmd.args[0], n, n
        )))
    }
}

#[async_trait]
impl ToolRunner for ScriptedHost {
    async fn run(&self, command: ToolCommand) -> SpotstackResult<ToolOutput> {
        let name = command.display_name().to_string();
        let (failing, panicking) = {
            let mut state = self.state.lock();
            state.calls.push(command.clone());
            (state.failing.contains(&name), state.panicking.contains(&name))
        };

        if panicking {
            panic!("{} exploded", name);
        }
        if failing {
            return Ok(ToolOutput::failed(1, format!("{} failed", name)));
        }

        match name.as_str() {
            "mount" => self.mount(&command),
            "losetup" => Ok(self.losetup()),
            "dd" => self.dd(&command),
            "qemu-img" => self.qemu_img(&command),
            "umount" => Ok(self.umount(&command)),
            "publish-tarball" => self.publish(&command).await,
            other => Ok(ToolOutput::failed(127, format!("{}: command not found", other))),
        }
    }
}

// ============================================================================
// PACKAGE SERVER
// ============================================================================

/// Minimal HTTP/1.1 server answering `GET /packages/<id>/package.xvm2`.
pub struct PackageServer {
    port: u16,
    packages: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl PackageServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let packages: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let (pkgs, reqs) = (packages.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let (pkgs, reqs) = (pkgs.clone(), reqs.clone());
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&buf);
                    let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                    reqs.lock().push(path.clone());

                    let body = path
                        .strip_prefix("/packages/")
                        .and_then(|rest| rest.strip_suffix("/package.xvm2"))
                        .and_then(|id| pkgs.lock().get(id).cloned());

                    let response = match body {
                        Some(body) => {
                            let mut r = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            r.extend_from_slice(&body);
                            r
                        }
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            port,
            packages,
            requests,
        }
    }

    pub fn url_template(&self) -> String {
        format!("http://127.0.0.1:{}/packages/%s/package.xvm2", self.port)
    }

    pub fn serve(&self, package_id: &str, archive: Vec<u8>) {
        self.packages.lock().insert(package_id.to_string(), archive);
    }

    /// Number of download requests for `package_id`.
    pub fn requests_for(&self, package_id: &str) -> usize {
        let path = format!("/packages/{}/package.xvm2", package_id);
        self.requests.lock().iter().filter(|p| **p == path).count()
    }
}

// ============================================================================
// PACKAGE ARCHIVES
// ============================================================================

/// Raw disk with one Linux partition starting at sector 63.
pub fn disk_image() -> Vec<u8> {
    let mut disk = vec![0u8; 512 * (FIRST_PARTITION_SECTOR as usize + 8)];
    let entry = 446;
    disk[entry + 4] = 0x83;
    disk[entry + 8..entry + 12].copy_from_slice(&FIRST_PARTITION_SECTOR.to_le_bytes());
    disk[entry + 12..entry + 16].copy_from_slice(&8u32.to_le_bytes());
    disk[510] = 0x55;
    disk[511] = 0xAA;
    disk
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn tar(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

/// A `.xvm2` package: manifest plus gzip-compressed partitioned disk.
pub fn package_archive() -> Vec<u8> {
    tar(&[
        ("package.xml", b"<package os=\"ubuntu\"/>".to_vec()),
        ("disk.img.gz", gzip(&disk_image())),
    ])
}

/// A package archive without any compressed disk.
pub fn archive_without_disk() -> Vec<u8> {
    tar(&[("package.xml", b"<package/>".to_vec())])
}

// ============================================================================
// TEST CONTEXT
// ============================================================================

/// Isolated runtime over the fakes. Temp dirs are removed on drop.
pub struct TestContext {
    pub runtime: SpotstackRuntime,
    pub cloud: Arc<FakeCloud>,
    pub host: Arc<ScriptedHost>,
    pub server: PackageServer,
    pub db: Database,
    _temp_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(|_| {}).await
    }

    pub async fn with_options(customize: impl FnOnce(&mut SpotstackOptions)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let server = PackageServer::start().await;
        let cloud = FakeCloud::new();
        let host = ScriptedHost::new();

        let mut options = SpotstackOptions {
            repo_dir: Some(temp_dir.path().join("repo")),
            package_download_url_template: server.url_template(),
            publish_script: PathBuf::from(PUBLISH_SCRIPT),
            use_sudo: false,
            poll_interval: Duration::from_millis(20),
            download_time_limit: Duration::from_secs(5),
            ..SpotstackOptions::with_home(temp_dir.path().join("home"))
        };
        customize(&mut options);

        let runtime = SpotstackRuntime::with_clients(options, cloud.clone(), host.clone())
            .expect("Failed to create runtime");
        let db = Database::open(&runtime.layout().db_path()).expect("Failed to open database");

        Self {
            runtime,
            cloud,
            host,
            server,
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Poll until the task is finished. Panics after ten seconds.
    pub async fn wait_for_task(&self, task_id: &str) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(task) = self.runtime.task(task_id).unwrap()
                && task.is_done()
            {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {} did not finish",
                task_id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Replace the runtime with a fresh one over the same home and clients,
    /// as after a process restart.
    pub fn restart(&mut self) {
        self.runtime = SpotstackRuntime::with_clients(
            self.runtime.options().clone(),
            self.cloud.clone(),
            self.host.clone(),
        )
        .expect("Failed to restart runtime");
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.runtime.layout().repo_dir().to_path_buf()
    }

    /// Sync the catalog from one instance type and return the id of its
    /// `<type>.<arch>` template.
    pub async fn hardware(&self, instance_type: &str, arch: &str) -> String {
        self.cloud.set_instance_types(&[(instance_type, 2048, 1)]);
        self.runtime.sync_hardware().await.unwrap();
        let name = format!("{}.{}", instance_type, arch);
        self.runtime
            .list_hardware()
            .unwrap()
            .into_iter()
            .find(|h| h.name == name)
            .map(|h| h.ecp_uuid)
            .expect("hardware template missing after sync")
    }
}
