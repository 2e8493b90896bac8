mod broadcast_test;
mod endpoint_test;
mod types_test;
