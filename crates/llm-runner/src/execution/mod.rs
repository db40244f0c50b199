pub mod cancellable;
