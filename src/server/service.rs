use std::io;
use std::sync::Arc;

use may_minihttp::{HttpService, Request, Response};

use super::request::parse_request;
use super::response::write_handler_response;
use crate::dispatcher::Dispatcher;

/// `may_minihttp` service adapter: parse, dispatch, write.
///
/// One clone of the service runs per connection coroutine; they all share
/// the same immutable dispatcher.
#[derive(Clone)]
pub struct AppService {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let parsed = parse_request(req);
        let response = self.dispatcher.dispatch(parsed);
        write_handler_response(res, response);
        Ok(())
    }
}
