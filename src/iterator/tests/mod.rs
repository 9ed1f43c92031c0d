
mod tests_verify;
