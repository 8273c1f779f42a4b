//! Messages between the UI loop and the background catalog worker
use crate::catalog::Show;
use anyhow::Error;

// Requests from UI/controller to the worker
#[derive(Debug, Clone)]
pub enum Request {
    LoadShows,
}

// Responses from worker back to UI/controller
#[derive(Debug)]
pub enum Response {
    ShowsLoaded(Result<Vec<Show>, Error>),
}
