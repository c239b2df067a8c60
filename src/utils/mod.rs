pub mod uid;

#[cfg(test)]
pub mod test_utils;
