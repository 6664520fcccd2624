//! Daemon lifecycle: session setup, mounting, signal handling, unmounting.

use std::sync::Arc;

use tokio::select;
use tracing::{debug, error, info};

use studip_api::backends::ReqwestClient;
use studip_api::{ApiError, StudIpClientBuilder};

use crate::app_config::Config;
use crate::cache::{CacheError, ContentCache};
use crate::fs::StudIpFs;
use crate::fs::crawler::Crawler;
use crate::fs::template::{PathTemplate, TemplateError};
use crate::fs::tree::Resolver;
use crate::status::StatusReporter;

/// Errors that keep the daemon from coming up. All of these happen before
/// (or while) mounting; once the mount is live only per-node errors remain.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The path format string is invalid.
    #[error("invalid path format: {0}")]
    Template(#[from] TemplateError),

    /// The server rejected the credentials.
    #[error("login failed: {0}")]
    Auth(ApiError),

    /// The server is missing a required endpoint or unreachable.
    #[error("server unusable: {0}")]
    Api(ApiError),

    /// The content cache directory is unusable.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Mount point, status file, or FUSE session I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for DaemonError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Auth => Self::Auth(e),
            other => Self::Api(other),
        }
    }
}

mod mount_guard {
    //! Mount lifecycle with a guaranteed-detached exit. Dropping fuser's
    //! `BackgroundSession` only requests a polite unmount; when an
    //! application still sits inside the tree that request bounces and a
    //! dead mount point would survive the process. The guard follows up
    //! with a detaching unmount until a short deadline passes.

    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use nix::errno::Errno;

    use studip_api::HttpClient;

    use super::{Config, StudIpFs, debug, error};
    use crate::fs::fuser::FuserAdapter;

    pub struct MountGuard {
        mount_point: PathBuf,
        session: Option<fuser::BackgroundSession>,
    }

    impl MountGuard {
        /// Mount `fs` read-only at the configured mount point.
        pub fn mount<C: HttpClient + 'static>(
            config: &Config,
            fs: Arc<StudIpFs<C>>,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let adapter = FuserAdapter::new(fs, handle);
            let options = [
                fuser::MountOption::FSName("studip-fuse".to_owned()),
                fuser::MountOption::RO,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
                fuser::MountOption::NoExec,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];
            let session = fuser::spawn_mount2(adapter, &config.mount_point, &options)?;
            Ok(Self {
                mount_point: config.mount_point.to_path_buf(),
                session: Some(session),
            })
        }
    }

    impl Drop for MountGuard {
        fn drop(&mut self) {
            // End the fuser session first so the kernel stops dispatching,
            // then make sure nothing is left mounted.
            drop(self.session.take());
            detach_mount(&self.mount_point);
        }
    }

    /// Unmount `path`, retrying while the mount is reported busy.
    fn detach_mount(path: &std::path::Path) {
        const BUSY_DEADLINE: Duration = Duration::from_millis(250);
        const BUSY_PAUSE: Duration = Duration::from_millis(25);

        let give_up_at = Instant::now() + BUSY_DEADLINE;
        loop {
            let result = {
                #[cfg(target_os = "macos")]
                {
                    nix::mount::unmount(path, nix::mount::MntFlags::MNT_FORCE)
                }

                #[cfg(target_os = "linux")]
                {
                    nix::mount::umount2(path, nix::mount::MntFlags::MNT_DETACH)
                }
            };

            match result {
                Ok(()) => {
                    debug!(mount_point = %path.display(), "mount detached");
                    return;
                }
                Err(Errno::EINVAL | Errno::ENOENT) => {
                    debug!(mount_point = %path.display(), "nothing left to unmount");
                    return;
                }
                Err(Errno::EBUSY) if Instant::now() < give_up_at => {
                    std::thread::sleep(BUSY_PAUSE);
                }
                Err(e) => {
                    error!(
                        mount_point = %path.display(), error = %e,
                        "unmount did not complete; a stale mount point may remain"
                    );
                    return;
                }
            }
        }
    }
}

/// Make sure the mount point is an empty directory, creating it if absent.
/// Mounting over existing content would shadow the user's files.
async fn ensure_mount_dir(path: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(path).await?;
            info!(mount_point = %path.display(), "created mount point");
            Ok(())
        }
        Err(e) => Err(e),
        Ok(mut entries) => match entries.next_entry().await? {
            None => Ok(()),
            Some(_) => Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "refusing to mount over non-empty directory '{}'",
                    path.display()
                ),
            )),
        },
    }
}

/// Block until the user or the system asks the daemon to stop, and report
/// which signal that was.
async fn shutdown_signal() -> Result<&'static str, std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let reason = select! {
        _ = tokio::signal::ctrl_c() => "interrupt",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
    };
    info!(reason, "stop requested");
    Ok(reason)
}

/// Main entry point for the daemon.
pub async fn run(config: Config, handle: tokio::runtime::Handle) -> Result<(), DaemonError> {
    // Compile the template before touching the network; a bad format string
    // must fail before anything is mounted.
    let template = PathTemplate::compile(&config.format)?;

    let status = Arc::new(StatusReporter::open(&config.data_dir)?);

    let backend = ReqwestClient::new(config.http.timeouts());
    let client = StudIpClientBuilder::new(backend)
        .with_base_url(&config.server.base_url)
        .with_basic_auth(&config.server.username, config.server.password.clone())
        .with_max_connections(config.http.max_connections)
        .build();

    // Credentials and endpoint discovery are verified up front; the mount
    // aborts on either failing.
    let user = client.open_session(&config.server.username).await?;
    status.event("INFO", "session open");
    info!(user = %user.username, "Session established.");

    let crawler = Crawler::new(client.clone(), user);
    let resolver = Resolver::new(crawler, template, config.generic_roots.clone());

    let cache = ContentCache::open(config.cache.path.to_path_buf(), client).await?;

    let fs = Arc::new(StudIpFs::new(
        resolver,
        cache,
        (config.uid, config.gid),
        config.web_base(),
    ));

    // Warm the root listing while the mount is coming up; report the
    // milestone once it lands.
    {
        let fs = Arc::clone(&fs);
        let status = Arc::clone(&status);
        handle.spawn(async move {
            match fs.resolver().expand(crate::fs::tree::ROOT_NODE).await {
                Ok(_) => status.event("INFO", "resolver root ready"),
                Err(e) => status.event("ERROR", &format!("resolver root failed: {e}")),
            }
        });
    }

    ensure_mount_dir(&config.mount_point).await?;
    info!(mount_point = %config.mount_point.display(), "mounting filesystem");

    let guard = mount_guard::MountGuard::mount(&config, fs, handle.clone())?;
    status.event("INFO", "mount ready");
    info!("studip-fuse is running. Press Ctrl+C to stop.");

    shutdown_signal().await?;
    drop(guard);
    status.event("INFO", "shutdown");
    Ok(())
}

pub fn spawn(config: Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let handle = runtime.handle().clone();
    runtime.block_on(run(config, handle))
}
