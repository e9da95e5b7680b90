/*
 * networking.rs
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

//! Kitchen-sink demo: REST-style routes with path captures, a handler that
//! performs an outgoing fetch before answering, and reactor timers.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use squall_core::web::{Application, Handler, RequestContext, Settings, UrlSpec};
use squall_core::{ClientRequest, HttpClient, HttpServer, Reactor, Result};

struct BookHandler;

#[async_trait(?Send)]
impl Handler for BookHandler {
    async fn get(&mut self, ctx: &mut RequestContext<'_>, args: Vec<String>) -> Result<()> {
        let price = ctx.get_argument("price")?;
        ctx.write(format!("Book name:{}, price:{}\n", args[0], price).as_bytes())
    }

    async fn post(&mut self, ctx: &mut RequestContext<'_>, args: Vec<String>) -> Result<()> {
        ctx.write(format!("Create book {}", args[0]).as_bytes())
    }

    async fn put(&mut self, ctx: &mut RequestContext<'_>, args: Vec<String>) -> Result<()> {
        ctx.write(format!("Update book {}", args[0]).as_bytes())
    }

    async fn delete(&mut self, ctx: &mut RequestContext<'_>, args: Vec<String>) -> Result<()> {
        ctx.write(format!("Delete book {}", args[0]).as_bytes())
    }
}

/// Fetches an upstream page before answering, showing that handlers may
/// await client requests mid-response.
struct FrontPageHandler;

#[async_trait(?Send)]
impl Handler for FrontPageHandler {
    async fn get(&mut self, ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        let client = HttpClient::new();
        let response = client
            .fetch(ClientRequest::new("https://example.com/").request_timeout(Duration::from_secs(10)))
            .await;
        log::info!("upstream HTTP code:{}", response.code);
        ctx.set_header("Content-Type", "text/plain")?;
        ctx.write(
            format!(
                "Hello world (upstream said {} in {:?})\n",
                response.code, response.request_time
            )
            .as_bytes(),
        )
    }
}

fn main() -> Result<()> {
    let reactor = Reactor::new()?;
    let settings = Settings {
        gzip: true,
        ..Default::default()
    };
    let app = Rc::new(Application::new(
        vec![
            UrlSpec::new("/", || FrontPageHandler),
            UrlSpec::new(r"/books/(\w+)/", || BookHandler),
        ],
        settings,
    ));
    let server = HttpServer::new(app);
    let handle = reactor.run_sync(server.listen("127.0.0.1", 3080))?;
    println!("Listening on http://127.0.0.1:{}/", handle.port());

    reactor.add_timeout(Duration::from_secs(1), || {
        log::info!("First Timer");
        Ok(())
    });
    reactor.add_timeout(Duration::from_secs(10), || {
        log::info!("Second Timer");
        Ok(())
    });

    reactor.start();
    log::info!("After stop");
    Ok(())
}
