use serde::Serialize;
use std::sync::Arc;
use stratum_core::{
    Error, InstallOptions, InstallParameters, InteractionReply, PackageManager,
    UninstallParameters, UpdateParameters,
};
use stratum_remote::RepoConfig;
use tracing::{error, info};
use zbus::interface;
use zbus::object_server::SignalContext;

pub const DBUS_INTERFACE: &str = "org.stratum.PackageManager1";
pub const DBUS_PATH: &str = "/org/stratum/PackageManager1";
pub const API_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct ErrorReply {
    code: i64,
    message: String,
}

fn error_reply(error: &Error) -> String {
    serde_json::to_string(&ErrorReply {
        code: error.code(),
        message: error.to_string(),
    })
    .unwrap_or_else(|_| r#"{"code":116,"message":"internal error"}"#.to_owned())
}

fn ok_reply(value: &impl Serialize) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => error_reply(&Error::Internal(format!("cannot serialize reply: {e}"))),
    }
}

fn reply_from<T: Serialize>(result: Result<T, Error>) -> String {
    match result {
        Ok(value) => ok_reply(&value),
        Err(e) => {
            error!("{e}");
            error_reply(&e)
        }
    }
}

/// The `org.stratum.PackageManager1` object.
pub struct PackageManagerService {
    manager: Arc<PackageManager>,
}

impl PackageManagerService {
    pub fn new(manager: Arc<PackageManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<PackageManager> {
        &self.manager
    }
}

#[allow(clippy::unused_async)]
#[interface(name = "org.stratum.PackageManager1")]
impl PackageManagerService {
    #[zbus(property)]
    async fn api_version(&self) -> u32 {
        API_VERSION
    }

    async fn install(&self, parameters: String) -> String {
        info!("D-Bus: Install");
        let parameters: InstallParameters = match serde_json::from_str(&parameters) {
            Ok(parameters) => parameters,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        reply_from(self.manager.install(parameters))
    }

    async fn install_from_file(
        &self,
        fd: zbus::zvariant::OwnedFd,
        file_type: String,
        options: String,
    ) -> String {
        info!("D-Bus: InstallFromFile ({file_type})");
        let options: InstallOptions = match serde_json::from_str(&options) {
            Ok(options) => options,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        let file = std::fs::File::from(std::os::fd::OwnedFd::from(fd));
        reply_from(self.manager.install_from_file(file, &file_type, options))
    }

    async fn uninstall(&self, parameters: String) -> String {
        info!("D-Bus: Uninstall");
        let parameters: UninstallParameters = match serde_json::from_str(&parameters) {
            Ok(parameters) => parameters,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        reply_from(self.manager.uninstall(parameters))
    }

    async fn update(&self, parameters: String) -> String {
        info!("D-Bus: Update");
        let parameters: UpdateParameters = match serde_json::from_str(&parameters) {
            Ok(parameters) => parameters,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        reply_from(self.manager.update(parameters))
    }

    async fn search(&self, id: String) -> String {
        info!("D-Bus: Search {id}");
        reply_from(self.manager.search(&id))
    }

    async fn prune(&self) -> String {
        info!("D-Bus: Prune");
        reply_from(self.manager.prune())
    }

    async fn generate_cache(&self, reference: String) -> String {
        info!("D-Bus: GenerateCache {reference}");
        reply_from(self.manager.generate_cache(&reference))
    }

    async fn reply_interaction(&self, task_object_path: String, reply: String) -> String {
        info!("D-Bus: ReplyInteraction {task_object_path}");
        let reply: InteractionReply = match serde_json::from_str(&reply) {
            Ok(reply) => reply,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        match self.manager.reply_interaction(&task_object_path, reply) {
            Ok(()) => ok_reply(&ErrorReply {
                code: 0,
                message: String::new(),
            }),
            Err(e) => error_reply(&e),
        }
    }

    async fn get_configuration(&self) -> String {
        ok_reply(&self.manager.get_configuration())
    }

    async fn set_configuration(&self, configuration: String) -> String {
        info!("D-Bus: SetConfiguration");
        let configuration: RepoConfig = match serde_json::from_str(&configuration) {
            Ok(configuration) => configuration,
            Err(e) => return error_reply(&Error::InvalidArgument(e.to_string())),
        };
        match self.manager.set_configuration(configuration) {
            Ok(()) => ok_reply(&ErrorReply {
                code: 0,
                message: String::new(),
            }),
            Err(e) => error_reply(&e),
        }
    }

    #[zbus(signal)]
    pub async fn task_added(
        ctxt: &SignalContext<'_>,
        object_path: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn task_changed(
        ctxt: &SignalContext<'_>,
        object_path: &str,
        state: &str,
        sub_state: &str,
        percentage: u32,
        message: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn request_interaction(
        ctxt: &SignalContext<'_>,
        object_path: &str,
        kind: &str,
        payload: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn search_finished(
        ctxt: &SignalContext<'_>,
        job_id: &str,
        result: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn prune_finished(
        ctxt: &SignalContext<'_>,
        job_id: &str,
        result: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn generate_cache_finished(
        ctxt: &SignalContext<'_>,
        job_id: &str,
        ok: bool,
    ) -> zbus::Result<()>;
}
