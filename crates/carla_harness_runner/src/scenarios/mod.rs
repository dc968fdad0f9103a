mod loopback_self_test;
mod single_note;
mod timeout_deactivates;
