mod socket_watcher;

pub use socket_watcher::spawn_socket_watcher;
