use anyhow::Result;
use embedded_svc::http::Headers;
use embedded_svc::io::Write;
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use log::{info, warn};

use crate::chatty;
use crate::debug_flags::DEBUG_HTTP;
use crate::echo::EchoBuffer;

const INDEX_HTML: &str = include_str!("../web/index.html");

/// `GET /` serves the status page, `POST /` echoes the body back.
pub fn start_server() -> Result<EspHttpServer<'static>> {
    let conf = Configuration {
        stack_size: 8 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        chatty!(DEBUG_HTTP, "HTTP GET /");
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html")])?
            .write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Post, |mut req| {
        let content_len = req.content_len().unwrap_or(0) as usize;
        match EchoBuffer::receive(&mut req, content_len) {
            Ok(echo) => {
                chatty!(DEBUG_HTTP, "HTTP POST echo {} bytes", echo.len());
                req.into_ok_response()?.write_all(echo.as_bytes())?;
            }
            Err(e) => {
                warn!("HTTP POST: {}", e);
                req.into_status_response(500)?
                    .write_all(b"Failed to receive request body")?;
            }
        }
        Ok(())
    })?;

    info!("HTTP server listening on port {}", conf.http_port);
    Ok(server)
}
