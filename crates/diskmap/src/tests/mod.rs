mod helpers;

mod map_tests;
mod temp_engine_tests;
