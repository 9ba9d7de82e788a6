//! This module provides ways to find and talk to timecards on a running
//! Linux system
pub mod class;
