//! # Server
//!
//! The [`Server`] exposes a [`SyncService`] to the surrounding
//! process. It accepts connections thanks to [`ServerBind`]ers, and
//! should have at least one of them, otherwise it only waits.

#[cfg(feature = "tcp")]
mod tcp;

use std::{future::Future, io, sync::Arc};

use async_trait::async_trait;
use futures::future;
use tracing::{debug, trace, warn};

#[cfg(feature = "tcp")]
#[doc(inline)]
pub use self::tcp::{TcpBind, TcpHandler};
use crate::{
    request::{Request, RequestReader},
    response::{Response, ResponseWriter},
    service::SyncService,
};

/// [`ServerBind`]ers must implement this trait.
#[async_trait]
pub trait ServerBind: Send + Sync {
    /// Describe how the server should bind to accept connections from
    /// clients.
    async fn bind(&self, service: Arc<dyn SyncService>) -> io::Result<()>;
}

/// Execute the given request against the given service.
///
/// [`Request::SetCallback`] needs a connection to stream events to,
/// so it is handled by [`ServerStream::handle`] instead.
pub async fn dispatch(service: &dyn SyncService, req: Request) -> Response {
    let res = match req {
        Request::GetApiLevel => Ok(Response::ApiLevel {
            level: service.api_level(),
        }),
        Request::Validate { host_auth } => service
            .validate(&host_auth)
            .await
            .map(|result| Response::Validation { result }),
        Request::StartSync {
            mailbox_id,
            user_requested,
        } => service
            .start_sync(mailbox_id, user_requested)
            .await
            .map(|outcome| Response::SyncStarted { outcome }),
        Request::StopSync { mailbox_id } => {
            service.stop_sync(mailbox_id).await.map(|()| Response::Ok)
        }
        Request::LoadAttachment {
            attachment_id,
            background,
        } => service
            .load_attachment(attachment_id, background)
            .await
            .map(|()| Response::Ok),
        Request::UpdateFolderList { account_id } => service
            .update_folder_list(account_id)
            .await
            .map(|()| Response::Ok),
        Request::HostChanged { account_id } => {
            service.host_changed(account_id).await.map(|()| Response::Ok)
        }
        Request::SetLogging { flags } => {
            service.set_logging(flags);
            Ok(Response::Ok)
        }
        Request::SetCallback => Ok(Response::NotSupported {
            command: "set callback without stream".into(),
        }),
        Request::GetCapabilities { account_id } => Ok(Response::Capabilities {
            capabilities: service.get_capabilities(account_id),
        }),
        Request::SearchMessages {
            account_id,
            query,
            dest_mailbox_id,
        } => service
            .search_messages(account_id, &query, dest_mailbox_id)
            .await
            .map(|count| Response::Count { count }),
        Request::SendMail { account_id } => {
            service.send_mail(account_id).await.map(|()| Response::Ok)
        }
        Request::SendMeetingResponse {
            message_id,
            response,
        } => service
            .send_meeting_response(message_id, response)
            .await
            .map(|()| Response::Ok),
        Request::CreateFolder { account_id, name } => service
            .create_folder(account_id, &name)
            .await
            .map(|done| Response::Done { done }),
        Request::DeleteFolder { account_id, name } => service
            .delete_folder(account_id, &name)
            .await
            .map(|done| Response::Done { done }),
        Request::RenameFolder {
            account_id,
            from,
            to,
        } => service
            .rename_folder(account_id, &from, &to)
            .await
            .map(|done| Response::Done { done }),
        Request::DeleteAccountPimData { account_id } => service
            .delete_account_pim_data(account_id)
            .await
            .map(|()| Response::Ok),
        Request::LoadMore { message_id } => {
            service.load_more(message_id).await.map(|()| Response::Ok)
        }
        Request::AutoDiscover { username, password } => service
            .auto_discover(&username, &password)
            .await
            .map(|host_auth| Response::HostAuth { host_auth }),
    };

    res.unwrap_or_else(|err| {
        debug!("cannot handle request: {err}");
        debug!("{err:?}");
        Response::from(err)
    })
}

/// [`ServerBind`]ers may implement this trait, but it is not
/// mandatory. By implementing [`RequestReader`] and
/// [`ResponseWriter`], the trait deduces how to handle a connection.
#[async_trait]
pub trait ServerStream: RequestReader + ResponseWriter {
    /// Handle requests until the client closes the stream.
    async fn handle(&mut self, service: Arc<dyn SyncService>) -> io::Result<()> {
        loop {
            let req = match self.read().await {
                Ok(Some(req)) => req,
                Ok(None) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    debug!("cannot read request: {err}");
                    let res = Response::Error {
                        message: err.to_string(),
                        store_unreachable: false,
                    };
                    self.write(res).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            trace!("received request: {req:?}");

            if let Request::SetCallback = req {
                return self.stream_events(service).await;
            }

            let res = dispatch(&*service, req).await;
            trace!("sending response: {res:?}");
            self.write(res).await?;
        }
    }

    /// Turn the stream into an observer: acknowledge, then forward
    /// every status event until the client goes away.
    async fn stream_events(&mut self, service: Arc<dyn SyncService>) -> io::Result<()> {
        let (id, mut events) = service.subscribe();
        debug!(observer = %id, "streaming status events");
        self.write(Response::Ok).await?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.write(Response::Event { event }).await?,
                    None => return Ok(()),
                },
                // reads are not cancel safe: a line cut by an event is
                // lost. Only the end of stream matters here, requests
                // on an event stream are ignored anyway.
                req = self.read() => match req {
                    Ok(Some(req)) => debug!("ignoring request on event stream: {req:?}"),
                    Ok(None) => return Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                        debug!("ignoring invalid request on event stream: {err}");
                    }
                    Err(err) => return Err(err),
                },
            }
        }
    }
}

impl<T: RequestReader + ResponseWriter> ServerStream for T {}

/// The server.
pub struct Server {
    service: Arc<dyn SyncService>,
    binders: Vec<Box<dyn ServerBind>>,
}

impl Server {
    pub fn new(service: Arc<dyn SyncService>) -> Self {
        Self {
            service,
            binders: Vec::new(),
        }
    }

    pub fn with_binder(mut self, binder: Box<dyn ServerBind>) -> Self {
        self.binders.push(binder);
        self
    }

    /// Run every binder in a dedicated task, until the given `wait`
    /// future resolves.
    pub async fn bind_with<F>(self, wait: F) -> io::Result<()>
    where
        F: Future<Output = io::Result<()>>,
    {
        debug!(protocol = self.service.protocol(), "starting server");

        let tasks: Vec<_> = self
            .binders
            .into_iter()
            .map(|binder| {
                let service = self.service.clone();
                tokio::spawn(async move {
                    if let Err(err) = binder.bind(service).await {
                        warn!("cannot bind, exiting: {err}");
                        debug!("{err:?}");
                    }
                })
            })
            .collect();

        let res = wait.await;

        debug!("stopping server");
        for task in &tasks {
            task.abort();
        }
        future::join_all(tasks).await;

        res
    }

    /// Wrapper around [`Server::bind_with`] waiting forever.
    pub async fn bind(self) -> io::Result<()> {
        self.bind_with(future::pending()).await
    }
}
