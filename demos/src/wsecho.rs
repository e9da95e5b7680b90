/*
 * wsecho.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Squall, an asynchronous web server and client library.
 *
 * Squall is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Squall is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Squall.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebSocket echo server with a tiny test page at /.

use std::rc::Rc;

use async_trait::async_trait;
use squall_core::web::{Application, Handler, RequestContext, Settings, UrlSpec};
use squall_core::websocket::{Message, WebSocketConnection, WebSocketHandler};
use squall_core::{HttpServer, Reactor, Result};

const PAGE: &str = r#"<html><body>
<script>
var ws = new WebSocket("ws://" + location.host + "/echo");
ws.onopen = function() { ws.send("hello"); };
ws.onmessage = function(e) { document.body.append(e.data); };
</script>
</body></html>
"#;

struct PageHandler;

#[async_trait(?Send)]
impl Handler for PageHandler {
    async fn get(&mut self, ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        ctx.write(PAGE.as_bytes())
    }
}

struct EchoHandler;

#[async_trait(?Send)]
impl WebSocketHandler for EchoHandler {
    async fn on_open(
        &mut self,
        _conn: &mut WebSocketConnection,
        _args: &[String],
    ) -> Result<()> {
        log::info!("WebSocket opened");
        Ok(())
    }

    async fn on_message(
        &mut self,
        conn: &mut WebSocketConnection,
        message: Message,
    ) -> Result<()> {
        match message {
            Message::Text(text) => conn.write_message(text.as_bytes(), false).await,
            Message::Binary(data) => conn.write_message(&data, true).await,
        }
    }

    fn on_close(&mut self) {
        log::info!("WebSocket closed");
    }
}

fn main() -> Result<()> {
    let reactor = Reactor::new()?;
    let app = Rc::new(Application::new(
        vec![
            UrlSpec::new("/", || PageHandler),
            UrlSpec::websocket("/echo", || EchoHandler),
        ],
        Settings::default(),
    ));
    let server = HttpServer::new(app);
    let handle = reactor.run_sync(server.listen("127.0.0.1", 8888))?;
    println!("Listening on http://127.0.0.1:{}/", handle.port());
    reactor.start();
    Ok(())
}
