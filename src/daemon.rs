use tokio::select;

use crate::app_config;
use tier_fs::fs::ShadowFs;
use tier_fs::fs::latency::{FixedPenalty, NoPenalty};
use tier_fs::fs::tiers::Tiers;
use tracing::{debug, info};

mod managed_fuse {
    //! fuser only does a regular unmount when the `BackgroundSession` is dropped. `ManagedFuse`
    //! follows up with a lazy unmount so a busy mount point does not stay wedged after exit.
    use std::path::PathBuf;
    use std::time::Duration;

    use nix::errno::Errno;

    use super::{ShadowFs, app_config, debug};
    use tier_fs::fs::fuser::FuserAdapter;
    use tracing::error;

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub fn spawn(
            &self,
            config: &app_config::Config,
            fs: ShadowFs,
            handle: tokio::runtime::Handle,
        ) -> Result<fuser::BackgroundSession, std::io::Error> {
            let adapter = FuserAdapter::new(fs, (config.uid, config.gid), handle);
            let mount_opts = [
                fuser::MountOption::FSName("tier-fs".to_owned()),
                fuser::MountOption::RO,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
                fuser::MountOption::AllowOther,
            ];

            fuser::spawn_mount2(adapter, &self.mount_point, &mount_opts)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for attempt in 1..=UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(attempt, "Unmounted FUSE filesystem.");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(attempt, "FUSE filesystem still busy, retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!(attempt, "FUSE filesystem already unmounted.");
                        break;
                    }
                    Err(e) => {
                        error!(attempt, error = %e, "Failed to unmount FUSE filesystem.");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents).
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Makes sure the origin tree exists before anything is mounted on top of it.
async fn check_origin(origin: &std::path::Path) -> Result<(), std::io::Error> {
    let meta = tokio::fs::metadata(origin).await?;
    if meta.is_dir() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("Origin '{}' is not a directory.", origin.display()),
        ))
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

fn build_fs(config: &app_config::Config) -> ShadowFs {
    let tiers = Tiers::new(&config.origin, &config.cache.path);
    let penalty = config.cold_read_penalty();
    if penalty.is_zero() {
        ShadowFs::with_policy(tiers, NoPenalty)
    } else {
        ShadowFs::with_policy(tiers, FixedPenalty(penalty))
    }
}

/// Main entry point for the daemon.
pub async fn run(
    config: app_config::Config,
    handle: tokio::runtime::Handle,
) -> Result<(), std::io::Error> {
    let fs = build_fs(&config);
    check_origin(fs.tiers().origin_root()).await?;

    let cache_root = fs.tiers().cache_root();
    tier_fs::io::reset_dir(cache_root).await?;
    info!(path = %cache_root.display(), "Cache tier is empty.");

    prepare_mount_point(&config.mount_point).await?;

    info!(
        origin = %config.origin.display(),
        "Mounting filesystem at {}.",
        config.mount_point.display()
    );

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse.spawn(&config, fs, handle)?;
        info!("tier-fs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
        info!("Interrupted, unmounting...");
    }
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, runtime.handle().clone()))
}
