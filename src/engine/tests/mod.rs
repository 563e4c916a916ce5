mod tests_sim_faults;
