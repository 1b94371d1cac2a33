//! The `Client` facade: one connection plus the services that run on it.
//!
//! `Client` owns the [`Connection`] and forwards each service call to the
//! connection's registry. It adds no behaviour of its own beyond login;
//! everything else is the service types from `oxygen-streams`, wired to
//! the directories in [`ClientConfig`].

use oxygen_protocol::{Message, Reply};
use oxygen_streams::{
    AssetService, BuildService, EventStream, LevelEvents, MetricsReporter, ObjectEvents,
    ObjectStream, PluginService, TransferOutcome,
};
use oxygen_transport::{Connection, Registry, StreamError, Subscriber, SubscriberId};

use crate::{ClientConfig, OxygenError, PasswordHasher, Sha256Hasher};

pub const LOGIN_NODE: &str = "LOGIN_SVR";
const LOGIN: &str = "LOGIN";

/// A connected Oxygen client.
///
/// Nothing is dispatched until [`process`](Self::process) is called;
/// every callback runs inside that call, on the caller's task.
pub struct Client<H = Sha256Hasher> {
    connection: Connection,
    hasher: H,
    assets: AssetService,
    builds: BuildService,
    plugins: PluginService,
}

impl Client {
    /// Connects with the default SHA-256 password digest.
    pub async fn connect(config: &ClientConfig) -> Result<Self, OxygenError> {
        Self::connect_with_hasher(config, Sha256Hasher).await
    }
}

impl<H: PasswordHasher> Client<H> {
    pub async fn connect_with_hasher(config: &ClientConfig, hasher: H) -> Result<Self, OxygenError> {
        let connection = Connection::connect(&config.connection).await?;
        Ok(Self {
            connection,
            hasher,
            assets: AssetService::new(config.asset_dir.clone(), &config.transfer),
            builds: BuildService::new(config.build_dir.clone()),
            plugins: PluginService::new(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn registry(&mut self) -> &mut Registry {
        self.connection.registry()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Dispatches inbound frames. See [`Connection::process`].
    pub async fn process(&mut self, wait: bool) -> Result<usize, OxygenError> {
        Ok(self.connection.process(wait).await?)
    }

    pub async fn shutdown(self) {
        self.connection.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Sends `LOGIN_SVR/LOGIN` with the username and password digest.
    ///
    /// `on_result` gets `Ok(())` on ACK and `Err(StreamError::Rejected)`
    /// with the server's code and text on NACK.
    pub fn login<F>(&mut self, username: &str, password: &str, on_result: F) -> Result<SubscriberId, OxygenError>
    where
        F: FnOnce(Result<(), StreamError>) + Send + 'static,
    {
        let mut request = Message::new(LOGIN_NODE, LOGIN);
        request
            .write_string(username)
            .write_bytes(&self.hasher.hash(password));

        let user = username.to_string();
        let id = self.connection.add(Subscriber::once(request, move |_ctx, reply| {
            let result = match Reply::read(reply) {
                Ok(reply) => reply.into_result().map_err(StreamError::from),
                Err(e) => Err(e.into()),
            };
            match &result {
                Ok(()) => tracing::info!(%user, "logged in"),
                Err(error) => tracing::warn!(%user, %error, "login failed"),
            }
            on_result(result);
        }))?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    pub fn open_object_stream<E>(&mut self, events: E) -> Result<ObjectStream, OxygenError>
    where
        E: ObjectEvents + 'static,
    {
        Ok(ObjectStream::open(self.connection.registry(), events)?)
    }

    pub fn open_event_stream<E>(&mut self, events: E) -> Result<EventStream, OxygenError>
    where
        E: LevelEvents + 'static,
    {
        Ok(EventStream::open(self.connection.registry(), events)?)
    }

    pub fn open_metrics(&mut self) -> Result<MetricsReporter, OxygenError> {
        Ok(MetricsReporter::open(self.connection.registry())?)
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    pub fn assets(&self) -> &AssetService {
        &self.assets
    }

    pub fn builds(&self) -> &BuildService {
        &self.builds
    }

    pub fn plugins(&self) -> &PluginService {
        &self.plugins
    }

    pub fn asset_list<F>(&mut self, on_list: F) -> Result<SubscriberId, OxygenError>
    where
        F: FnOnce(Result<Vec<String>, StreamError>) + Send + 'static,
    {
        Ok(self.assets.asset_list(self.connection.registry(), on_list)?)
    }

    pub fn download_asset<F>(&mut self, name: &str, checksum: Option<&str>, on_complete: F) -> Result<bool, OxygenError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        Ok(self
            .assets
            .download_asset(self.connection.registry(), name, checksum, on_complete)?)
    }

    pub fn upload_asset<F>(&mut self, name: &str, on_complete: F) -> Result<bool, OxygenError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        Ok(self
            .assets
            .upload_asset(self.connection.registry(), name, on_complete)?)
    }

    pub fn download_artefact<F>(&mut self, name: &str, on_complete: F) -> Result<bool, OxygenError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        Ok(self
            .builds
            .download_artefact(self.connection.registry(), name, on_complete)?)
    }

    pub fn schedule_plugin(&mut self, name: &str) -> Result<bool, OxygenError> {
        Ok(self.plugins.schedule_plugin(self.connection.registry(), name)?)
    }
}

impl<H> std::fmt::Debug for Client<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("assets", &self.assets)
            .field("builds", &self.builds)
            .field("plugins", &self.plugins)
            .finish()
    }
}
