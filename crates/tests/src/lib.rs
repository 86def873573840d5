pub mod fixtures;

#[cfg(test)]
mod client_tests;
#[cfg(test)]
mod http_tests;
#[cfg(test)]
mod reconnect_tests;
#[cfg(test)]
mod voting_tests;
