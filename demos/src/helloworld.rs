/*
 * helloworld.rs
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

//! Minimal HTTP server: GET / answers "Hello, world".

use std::rc::Rc;

use async_trait::async_trait;
use squall_core::web::{Application, Handler, RequestContext, Settings, UrlSpec};
use squall_core::{HttpServer, Reactor, Result};

struct MainHandler;

#[async_trait(?Send)]
impl Handler for MainHandler {
    async fn get(&mut self, ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        ctx.set_header("Content-Type", "text/plain")?;
        ctx.write(b"Hello, world")
    }
}

fn main() -> Result<()> {
    let reactor = Reactor::new()?;
    let app = Rc::new(Application::new(
        vec![UrlSpec::new("/", || MainHandler)],
        Settings::default(),
    ));
    let server = HttpServer::new(app);
    let handle = reactor.run_sync(server.listen("127.0.0.1", 8888))?;
    println!("Listening on http://127.0.0.1:{}/", handle.port());
    reactor.start();
    Ok(())
}
