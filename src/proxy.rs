use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Uri;
use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use tower_service::Service;

use crate::error::BoxError;

/// Connector routing exchanges through an optional forward proxy.
///
/// https targets are reached with a CONNECT tunnel through the proxy;
/// plain http goes to the proxy in absolute form. Without a proxy every
/// connection is direct.
#[derive(Clone)]
pub(crate) struct ProxyConnector {
    direct: HttpConnector,
    proxy: Option<ProxyRuntime>,
}

#[derive(Clone)]
struct ProxyRuntime {
    tunnel: Tunnel<HttpConnector>,
    proxy_uri: Uri,
}

impl ProxyConnector {
    pub(crate) fn new(proxy_uri: Option<Uri>) -> Self {
        let mut direct = HttpConnector::new();
        direct.enforce_http(false);
        let proxy = proxy_uri.map(|uri| ProxyRuntime {
            tunnel: Tunnel::new(uri.clone(), direct.clone()),
            proxy_uri: uri,
        });
        Self { direct, proxy }
    }
}

#[derive(Debug)]
pub(crate) struct ProxyConnection<T> {
    inner: T,
    proxied: bool,
}

impl<T> ProxyConnection<T> {
    fn new(inner: T, proxied: bool) -> Self {
        Self { inner, proxied }
    }
}

impl<T> HyperRead for ProxyConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<T> HyperWrite for ProxyConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }
}

impl<T> Connection for ProxyConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(self.proxied)
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ProxyConnection<<HttpConnector as Service<Uri>>::Response>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let direct = self
            .direct
            .poll_ready(cx)
            .map_err(|error| Box::new(error) as BoxError);
        let Some(proxy) = &mut self.proxy else {
            return direct;
        };

        let tunnel = proxy
            .tunnel
            .poll_ready(cx)
            .map_err(|error| Box::new(error) as BoxError);
        match (direct, tunnel) {
            (Poll::Ready(Err(error)), _) | (_, Poll::Ready(Err(error))) => Poll::Ready(Err(error)),
            (Poll::Ready(Ok(())), Poll::Ready(Ok(()))) => Poll::Ready(Ok(())),
            _ => Poll::Pending,
        }
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let wants_tunnel = dst
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));

        match &mut self.proxy {
            Some(proxy) if wants_tunnel => {
                let connecting = proxy.tunnel.call(with_default_port(dst));
                Box::pin(async move {
                    let connection = connecting.await.map_err(|error| Box::new(error) as BoxError)?;
                    Ok(ProxyConnection::new(connection, false))
                })
            }
            Some(proxy) => {
                let connecting = self.direct.call(proxy.proxy_uri.clone());
                Box::pin(async move {
                    let connection = connecting.await.map_err(|error| Box::new(error) as BoxError)?;
                    Ok(ProxyConnection::new(connection, true))
                })
            }
            None => {
                let connecting = self.direct.call(dst);
                Box::pin(async move {
                    let connection = connecting.await.map_err(|error| Box::new(error) as BoxError)?;
                    Ok(ProxyConnection::new(connection, false))
                })
            }
        }
    }
}

/// CONNECT targets must carry an explicit port.
pub(crate) fn with_default_port(dst: Uri) -> Uri {
    if dst.port().is_some() {
        return dst;
    }
    let port = match dst.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("https") => 443,
        Some(scheme) if scheme.eq_ignore_ascii_case("http") => 80,
        _ => return dst,
    };
    let Some(host) = dst.host() else {
        return dst;
    };

    // Bare IPv6 hosts need brackets back before the port is appended.
    let authority = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let Ok(authority) = authority.parse() else {
        return dst;
    };

    let original = dst.clone();
    let mut parts = dst.into_parts();
    parts.authority = Some(authority);
    Uri::from_parts(parts).unwrap_or(original)
}
